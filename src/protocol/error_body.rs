//! Structured error bodies returned by API and identity servers.
//!
//! # Wire Format
//!
//! API servers answer failed requests with:
//! ```json
//! {
//!     "type": "error",
//!     "status": "UNAUTHORIZED",
//!     "code": 401,
//!     "time": "2024-05-01T12:00:00Z",
//!     "error": {
//!         "type": "AUTHENTICATION",
//!         "status": "UNAUTHORIZED",
//!         "message": "token expired",
//!         "description": "The access token has expired.",
//!         "actions": ["LOGIN"]
//!     }
//! }
//! ```
//!
//! Identity servers use the OAuth2 shape instead:
//! ```json
//! {
//!     "error": "invalid_grant",
//!     "error_description": "Token is not active"
//! }
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A body shape the error mapping can decode and synthesize.
///
/// The mapping first decodes the response as `Self`, then as
/// [`AuthErrorBody`] converted through [`from_auth_error`], and finally falls
/// back to [`forbidden`].
///
/// [`from_auth_error`]: ErrorBody::from_auth_error
/// [`forbidden`]: ErrorBody::forbidden
pub trait ErrorBody: DeserializeOwned {
    /// Numeric status code carried in the body, if any.
    fn status_code(&self) -> Option<i32>;

    /// Human-readable description for display.
    fn description(&self) -> Option<&str>;

    /// Converts an identity-server error received with HTTP `status`.
    fn from_auth_error(body: AuthErrorBody, status: u16) -> Self;

    /// Synthesized body for responses that could not be decoded at all.
    fn forbidden() -> Self;
}

/// OAuth2 error response.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct AuthErrorBody {
    pub error: String,

    #[serde(default)]
    pub error_description: Option<String>,
}

/// Error response of the API servers.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct ServerErrorBody {
    #[serde(default, rename = "type")]
    pub typ: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub code: Option<i32>,

    #[serde(default)]
    pub time: Option<String>,

    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct ErrorDetail {
    #[serde(default, rename = "type")]
    pub typ: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub actions: Vec<String>,
}

impl ServerErrorBody {
    const FORBIDDEN_CODE: i32 = 403;
    const FORBIDDEN_STATUS: &'static str = "FORBIDDEN";
}

impl ErrorBody for ServerErrorBody {
    fn status_code(&self) -> Option<i32> {
        self.code
    }

    fn description(&self) -> Option<&str> {
        self.error
            .as_ref()
            .and_then(|detail| detail.description.as_deref().or(detail.message.as_deref()))
    }

    fn from_auth_error(body: AuthErrorBody, status: u16) -> Self {
        Self {
            typ: Some("error".to_owned()),
            status: Some(body.error.to_uppercase()),
            code: Some(i32::from(status)),
            time: None,
            error: Some(ErrorDetail {
                typ: Some("AUTHENTICATION".to_owned()),
                status: Some(body.error.clone()),
                message: Some(body.error),
                description: body.error_description,
                actions: Vec::new(),
            }),
        }
    }

    fn forbidden() -> Self {
        Self {
            typ: Some("error".to_owned()),
            status: Some(Self::FORBIDDEN_STATUS.to_owned()),
            code: Some(Self::FORBIDDEN_CODE),
            time: None,
            error: Some(ErrorDetail {
                typ: Some(Self::FORBIDDEN_STATUS.to_owned()),
                status: Some(Self::FORBIDDEN_STATUS.to_owned()),
                message: Some("forbidden".to_owned()),
                description: None,
                actions: Vec::new(),
            }),
        }
    }
}
