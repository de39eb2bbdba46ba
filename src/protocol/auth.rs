//! OAuth2 token endpoint types.
//!
//! The token endpoint answers both the initial login and every refresh with
//! the same record, which is persisted as-is by the
//! [`TokenStore`](crate::tokens::TokenStore).
//!
//! # Example Response
//!
//! ```json
//! {
//!     "access_token": "eyJhbGciOi...",
//!     "expires_in": 300,
//!     "refresh_expires_in": 1800,
//!     "refresh_token": "eyJhbGciOi...",
//!     "token_type": "Bearer",
//!     "id_token": "eyJhbGciOi...",
//!     "not-before-policy": 0,
//!     "session_state": "5c2c2e6f-...",
//!     "scope": "openid profile email"
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{formats::Flexible, serde_as, DurationSeconds};
use veil::Redact;

use crate::credential::OidcAuthenticationFlow;

/// Token record issued by the token endpoint.
///
/// Replaced wholesale on every refresh.
#[serde_as]
#[derive(Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Redact)]
pub struct Auth {
    /// Bearer token for API requests
    #[redact]
    pub access_token: String,

    /// Token to obtain a new access token with
    #[redact]
    pub refresh_token: String,

    /// OpenID Connect identity token
    #[redact]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Lifetime of the access token
    #[serde_as(as = "DurationSeconds<u64, Flexible>")]
    pub expires_in: Duration,

    /// Lifetime of the refresh token
    #[serde_as(as = "Option<DurationSeconds<u64, Flexible>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_expires_in: Option<Duration>,

    #[serde(default = "Auth::default_token_type")]
    pub token_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<String>,

    #[serde(
        default,
        rename = "not-before-policy",
        skip_serializing_if = "Option::is_none"
    )]
    pub not_before_policy: Option<i64>,
}

impl Auth {
    fn default_token_type() -> String {
        "Bearer".to_owned()
    }

    /// Value for an `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Form body of a `refresh_token` grant.
#[derive(Clone, Eq, PartialEq, Serialize, Redact)]
pub struct RefreshRequest {
    pub grant_type: &'static str,

    pub client_id: String,

    #[redact]
    pub refresh_token: String,

    #[redact]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

impl RefreshRequest {
    pub const GRANT_TYPE: &'static str = "refresh_token";

    /// Builds the refresh form for `flow`.
    ///
    /// Only direct-grant flows send their client secret.
    #[must_use]
    pub fn new(flow: &OidcAuthenticationFlow, refresh_token: &str) -> Self {
        Self {
            grant_type: Self::GRANT_TYPE,
            client_id: flow.client_id().value().to_owned(),
            refresh_token: refresh_token.to_owned(),
            client_secret: flow.client_secret().map(|secret| secret.value().to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;

    const RESPONSE: &str = r#"{
        "access_token": "access",
        "expires_in": 300,
        "refresh_expires_in": "1800",
        "refresh_token": "refresh",
        "token_type": "Bearer",
        "not-before-policy": 0,
        "session_state": "abc",
        "scope": "openid"
    }"#;

    #[test]
    fn parses_token_endpoint_response() {
        let auth: Auth = serde_json::from_str(RESPONSE).unwrap();
        assert_eq!(auth.access_token, "access");
        assert_eq!(auth.expires_in, Duration::from_secs(300));
        assert_eq!(auth.refresh_expires_in, Some(Duration::from_secs(1800)));
        assert_eq!(auth.id_token, None);
        assert_eq!(auth.bearer(), "Bearer access");
        assert!(!format!("{auth:?}").contains("\"access\""));
    }

    #[test]
    fn client_secret_only_for_direct_grant() {
        let direct = OidcAuthenticationFlow::DirectGrant {
            token_endpoint: Credential::same("https://id.example.com/token"),
            client_id: Credential::same("mobile"),
            client_secret: Credential::same("s3cret"),
            grant_type: Credential::same("password"),
        };
        let form = serde_json::to_value(RefreshRequest::new(&direct, "rt")).unwrap();
        assert_eq!(form["grant_type"], "refresh_token");
        assert_eq!(form["client_secret"], "s3cret");

        let pkce = OidcAuthenticationFlow::Pkce {
            authorization_endpoint: Credential::same("https://id.example.com/auth"),
            token_endpoint: Credential::same("https://id.example.com/token"),
            client_id: Credential::same("web"),
            redirect_url: Credential::same("app://cb"),
            scope: Credential::same("openid"),
            grant_type: Credential::same("authorization_code"),
            response_type: Credential::same("code"),
        };
        let form = serde_json::to_value(RefreshRequest::new(&pkce, "rt")).unwrap();
        assert!(form.get("client_secret").is_none());
        assert_eq!(form["client_id"], "web");
    }
}
