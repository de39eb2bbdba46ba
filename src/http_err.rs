//! Classification of HTTP failures.
//!
//! Every failed call of the [`http`](crate::http) client is turned into one
//! variant of the closed [`HttpErr`] set. Where the server sent a response,
//! its body is decoded as the caller's error shape `T`, falling back to the
//! identity-server shape and finally to a synthesized "forbidden" body, so
//! the HTTP status is never lost to a decoding problem.
//!
//! # Classification
//!
//! With a response:
//! * 4xx -> [`HttpErr::ClientErr`], flagged as an authorization error when
//!   the decoded body carries code 401
//! * 3xx -> [`HttpErr::RedirectErr`]
//! * 5xx -> [`HttpErr::ServerErr`]
//! * anything else -> [`HttpErr::GenericHttpErr`]
//!
//! Without a response (status is [`NO_STATUS`]):
//! * network failures -> [`HttpErr::ConnectionErr`]
//! * body shape mismatches -> [`HttpErr::AuthorizationErr`]
//! * JSON decoding failures -> [`HttpErr::HttpJsonParseErr`]
//!
//! Classification is deterministic and never retries.

use std::fmt;

use reqwest::{header::HeaderMap, StatusCode};
use thiserror::Error;

use crate::{
    error::{Error, ErrorKind},
    protocol::error_body::{AuthErrorBody, ErrorBody},
};

/// Status reported when no HTTP response exists.
pub const NO_STATUS: i32 = -1;

/// Originating failure of an [`HttpErr`].
pub type Cause = Box<dyn std::error::Error + Send + Sync>;

/// A response with a non-success status.
#[derive(Debug, Error)]
#[error("HTTP {status}")]
pub struct StatusError {
    pub status: StatusCode,
    pub url: Option<url::Url>,
}

/// Closed set of HTTP failure kinds.
///
/// Every variant carries the originating failure, the HTTP status (or
/// [`NO_STATUS`]) and the decoded error body if one could be produced.
pub enum HttpErr<T> {
    ClientErr {
        cause: Cause,
        status: i32,
        headers: HeaderMap,
        body: Option<T>,
        is_auth_err: bool,
    },
    RedirectErr {
        cause: Cause,
        status: i32,
        body: Option<T>,
    },
    ServerErr {
        cause: Cause,
        status: i32,
        body: Option<T>,
    },
    GenericHttpErr {
        cause: Cause,
        status: i32,
        body: Option<T>,
    },
    ConnectionErr {
        cause: Cause,
        status: i32,
        body: Option<T>,
    },
    AuthorizationErr {
        cause: Cause,
        status: i32,
        body: Option<T>,
    },
    HttpJsonParseErr {
        cause: Cause,
        status: i32,
        body: Option<T>,
    },
}

impl<T: ErrorBody> HttpErr<T> {
    /// Classifies a received response with a non-success status.
    #[must_use]
    pub fn from_response(
        status: StatusCode,
        headers: HeaderMap,
        bytes: &[u8],
        url: Option<url::Url>,
    ) -> Self {
        let body = decode_body::<T>(status, bytes);
        let cause: Cause = Box::new(StatusError { status, url });
        let code = i32::from(status.as_u16());

        if status.is_client_error() {
            let is_auth_err = body.status_code() == Some(401);
            Self::ClientErr {
                cause,
                status: code,
                headers,
                body: Some(body),
                is_auth_err,
            }
        } else if status.is_redirection() {
            Self::RedirectErr {
                cause,
                status: code,
                body: Some(body),
            }
        } else if status.is_server_error() {
            Self::ServerErr {
                cause,
                status: code,
                body: Some(body),
            }
        } else {
            Self::GenericHttpErr {
                cause,
                status: code,
                body: Some(body),
            }
        }
    }
}

/// Decodes an error body: caller shape, then auth shape, then synthesized.
fn decode_body<T: ErrorBody>(status: StatusCode, bytes: &[u8]) -> T {
    match serde_json::from_slice::<T>(bytes) {
        Ok(body) => body,
        Err(e) => {
            trace!("error body is not of the expected shape: {e}");
            match serde_json::from_slice::<AuthErrorBody>(bytes) {
                Ok(auth) => T::from_auth_error(auth, status.as_u16()),
                Err(_) => {
                    debug!("synthesizing error body for undecodable {status} response");
                    T::forbidden()
                }
            }
        }
    }
}

impl<T> HttpErr<T> {
    /// Classifies a client failure that produced no usable response.
    #[must_use]
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::HttpJsonParseErr {
                cause: Box::new(err),
                status: NO_STATUS,
                body: None,
            };
        }

        Self::ConnectionErr {
            cause: Box::new(err),
            status: NO_STATUS,
            body: None,
        }
    }

    /// A response body did not match the expected shape outside of any
    /// HTTP error.
    #[must_use]
    pub fn no_transformation<E>(cause: E) -> Self
    where
        E: Into<Cause>,
    {
        Self::AuthorizationErr {
            cause: cause.into(),
            status: NO_STATUS,
            body: None,
        }
    }

    /// JSON decoding failed outside of any HTTP error.
    #[must_use]
    pub fn json_parse(err: serde_json::Error) -> Self {
        Self::HttpJsonParseErr {
            cause: Box::new(err),
            status: NO_STATUS,
            body: None,
        }
    }

    /// Numeric HTTP status, or [`NO_STATUS`].
    #[must_use]
    pub fn status(&self) -> i32 {
        match self {
            Self::ClientErr { status, .. }
            | Self::RedirectErr { status, .. }
            | Self::ServerErr { status, .. }
            | Self::GenericHttpErr { status, .. }
            | Self::ConnectionErr { status, .. }
            | Self::AuthorizationErr { status, .. }
            | Self::HttpJsonParseErr { status, .. } => *status,
        }
    }

    #[must_use]
    pub fn body(&self) -> Option<&T> {
        match self {
            Self::ClientErr { body, .. }
            | Self::RedirectErr { body, .. }
            | Self::ServerErr { body, .. }
            | Self::GenericHttpErr { body, .. }
            | Self::ConnectionErr { body, .. }
            | Self::AuthorizationErr { body, .. }
            | Self::HttpJsonParseErr { body, .. } => body.as_ref(),
        }
    }

    #[must_use]
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        match self {
            Self::ClientErr { cause, .. }
            | Self::RedirectErr { cause, .. }
            | Self::ServerErr { cause, .. }
            | Self::GenericHttpErr { cause, .. }
            | Self::ConnectionErr { cause, .. }
            | Self::AuthorizationErr { cause, .. }
            | Self::HttpJsonParseErr { cause, .. } => cause.as_ref(),
        }
    }

    /// Whether the user has to log in again.
    #[must_use]
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationErr { .. } | Self::ClientErr { is_auth_err: true, .. }
        )
    }

    /// Whether the server could not be reached at all.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::ConnectionErr { .. })
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ClientErr { .. } => "client error",
            Self::RedirectErr { .. } => "redirect",
            Self::ServerErr { .. } => "server error",
            Self::GenericHttpErr { .. } => "HTTP error",
            Self::ConnectionErr { .. } => "connection error",
            Self::AuthorizationErr { .. } => "authorization error",
            Self::HttpJsonParseErr { .. } => "JSON parse error",
        }
    }
}

impl<T: ErrorBody> HttpErr<T> {
    /// Server-provided description, if the body has one.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.body().and_then(ErrorBody::description)
    }
}

impl<T: fmt::Debug> fmt::Debug for HttpErr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.name())
            .field("status", &self.status())
            .field("cause", &self.cause())
            .field("body", &self.body())
            .finish()
    }
}

impl<T> fmt::Display for HttpErr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.cause())
    }
}

impl<T: fmt::Debug> std::error::Error for HttpErr<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause())
    }
}

/// Collapses the HTTP classification into the crate-wide error kinds.
impl<T> From<HttpErr<T>> for Error {
    fn from(err: HttpErr<T>) -> Self {
        let kind = match &err {
            HttpErr::ClientErr {
                is_auth_err: true, ..
            }
            | HttpErr::AuthorizationErr { .. } => ErrorKind::Unauthenticated,
            HttpErr::ClientErr { status: 401, .. } => ErrorKind::Unauthenticated,
            HttpErr::ClientErr { status: 403, .. } => ErrorKind::PermissionDenied,
            HttpErr::ClientErr { status: 404, .. } => ErrorKind::NotExists,
            HttpErr::ClientErr { .. } => ErrorKind::User,
            HttpErr::ServerErr { status: 503, .. } | HttpErr::ConnectionErr { .. } => {
                ErrorKind::Unavailable
            }
            HttpErr::ServerErr { .. } => ErrorKind::Internal,
            HttpErr::RedirectErr { .. } | HttpErr::GenericHttpErr { .. } => ErrorKind::Generic,
            HttpErr::HttpJsonParseErr { .. } => ErrorKind::JsonParse,
        };
        Error::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::error_body::ServerErrorBody;

    type Failure = HttpErr<ServerErrorBody>;

    fn classify(status: u16, body: &str) -> Failure {
        HttpErr::from_response(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            body.as_bytes(),
            None,
        )
    }

    #[test]
    fn unauthorized_body_flags_auth_error() {
        let err = classify(401, r#"{"code":401,"error":{"description":"expired"}}"#);
        assert!(matches!(
            err,
            HttpErr::ClientErr {
                is_auth_err: true,
                status: 401,
                ..
            }
        ));
        assert!(err.is_authorization());
        assert_eq!(err.description(), Some("expired"));
    }

    #[test]
    fn client_error_without_401_code_is_not_auth_error() {
        let err = classify(400, r#"{"code":400}"#);
        assert!(matches!(err, HttpErr::ClientErr { is_auth_err: false, .. }));
        assert!(!err.is_authorization());
    }

    #[test]
    fn unparsable_forbidden_synthesizes_body() {
        let err = classify(403, "<html>nope</html>");
        assert!(matches!(err, HttpErr::ClientErr { status: 403, .. }));
        assert_eq!(err.body(), Some(&ServerErrorBody::forbidden()));
        assert_eq!(Error::from(err).kind, ErrorKind::PermissionDenied);
    }

    #[test]
    fn auth_shape_is_second_choice() {
        let err = classify(
            401,
            r#"{"error":"invalid_grant","error_description":"Session not active"}"#,
        );
        assert!(err.is_authorization());
        assert_eq!(err.description(), Some("Session not active"));
    }

    #[test]
    fn classifies_by_status_range() {
        assert!(matches!(classify(302, ""), HttpErr::RedirectErr { status: 302, .. }));
        assert!(matches!(classify(500, "{}"), HttpErr::ServerErr { status: 500, .. }));
        assert!(matches!(classify(101, "{}"), HttpErr::GenericHttpErr { status: 101, .. }));
    }

    #[test]
    fn errors_without_response_use_sentinel() {
        let parse = serde_json::from_str::<u8>("x").unwrap_err();
        let err: Failure = HttpErr::json_parse(parse);
        assert_eq!(err.status(), NO_STATUS);
        assert!(err.body().is_none());
        assert_eq!(Error::from(err).kind, ErrorKind::JsonParse);

        let err: Failure = HttpErr::no_transformation("no transformation found");
        assert_eq!(err.status(), NO_STATUS);
        assert!(err.is_authorization());
    }

    #[tokio::test]
    async fn unreachable_host_is_connection_error() {
        // Port 9 on localhost is reserved for discard and normally closed.
        let result = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await;
        let err: Failure = HttpErr::from_transport(result.unwrap_err());
        assert!(err.is_offline());
        assert_eq!(err.status(), NO_STATUS);
        assert_eq!(Error::from(err).kind, ErrorKind::Unavailable);
    }
}
