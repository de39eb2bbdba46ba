//! OIDC flow configuration.
//!
//! Every configured value exists in two variants: one for debug builds and
//! one for release builds. The variant is picked when the value is read, so
//! a single configuration file can target a staging identity provider from
//! development builds and the production one from release builds.
//!
//! # Flows
//!
//! * [`OidcAuthenticationFlow::Pkce`] - authorization code flow with PKCE,
//!   for public clients that cannot keep a secret
//! * [`OidcAuthenticationFlow::DirectGrant`] - direct exchange with the token
//!   endpoint; the only flow that sends a client secret
//!
//! # Configuration Format
//!
//! ```toml
//! [oidc]
//! flow = "direct_grant"
//! token_endpoint = "https://id.example.com/realms/app/protocol/openid-connect/token"
//! client_id = "mobile"
//! client_secret = { debug = "dev-secret", release = "prod-secret" }
//! grant_type = "password"
//! ```

use std::fmt;

use serde::Deserialize;
use url::Url;
use veil::Redact;

use crate::error::{Error, Result};

/// Build configuration a [`Credential`] resolves against.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    /// The profile this crate was compiled with.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(debug_assertions) {
            Self::Debug
        } else {
            Self::Release
        }
    }
}

impl fmt::Display for BuildProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Release => write!(f, "release"),
        }
    }
}

/// A configuration value with a debug and a release variant.
///
/// Immutable once constructed. Deserializes from either a plain string,
/// which is used for both variants, or a `{ debug, release }` table.
#[derive(Clone, Eq, PartialEq, Hash, Deserialize, Redact)]
#[serde(from = "CredentialRepr")]
#[redact(all)]
pub struct Credential {
    debug: String,
    release: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CredentialRepr {
    Both(String),
    Split { debug: String, release: String },
}

impl From<CredentialRepr> for Credential {
    fn from(repr: CredentialRepr) -> Self {
        match repr {
            CredentialRepr::Both(value) => Self::same(value),
            CredentialRepr::Split { debug, release } => Self::new(debug, release),
        }
    }
}

impl Credential {
    #[must_use]
    pub fn new(debug: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            debug: debug.into(),
            release: release.into(),
        }
    }

    /// A credential whose debug and release variants are equal.
    #[must_use]
    pub fn same(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            debug: value.clone(),
            release: value,
        }
    }

    /// Returns the variant for the build profile this crate was compiled
    /// with.
    #[must_use]
    pub fn value(&self) -> &str {
        self.value_for(BuildProfile::current())
    }

    #[must_use]
    pub fn value_for(&self, profile: BuildProfile) -> &str {
        match profile {
            BuildProfile::Debug => &self.debug,
            BuildProfile::Release => &self.release,
        }
    }

    /// Parses the current variant as a URL.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the value is not an absolute URL.
    pub fn url(&self) -> Result<Url> {
        Url::parse(self.value()).map_err(Into::into)
    }
}

/// The OAuth2/OIDC flow a client is configured for.
///
/// Exactly one variant is active per configured client. The variant decides
/// whether a client secret is sent when refreshing tokens.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Deserialize)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum OidcAuthenticationFlow {
    /// Authorization code flow with Proof Key for Code Exchange.
    Pkce {
        authorization_endpoint: Credential,
        token_endpoint: Credential,
        client_id: Credential,
        redirect_url: Credential,
        scope: Credential,
        grant_type: Credential,
        response_type: Credential,
    },

    /// Direct exchange of credentials or refresh tokens with the token
    /// endpoint, without a browser redirect.
    DirectGrant {
        token_endpoint: Credential,
        client_id: Credential,
        client_secret: Credential,
        grant_type: Credential,
    },
}

impl OidcAuthenticationFlow {
    #[must_use]
    pub fn token_endpoint(&self) -> &Credential {
        match self {
            Self::Pkce { token_endpoint, .. } | Self::DirectGrant { token_endpoint, .. } => {
                token_endpoint
            }
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &Credential {
        match self {
            Self::Pkce { client_id, .. } | Self::DirectGrant { client_id, .. } => client_id,
        }
    }

    /// The client secret, which only direct-grant clients have.
    #[must_use]
    pub fn client_secret(&self) -> Option<&Credential> {
        match self {
            Self::Pkce { .. } => None,
            Self::DirectGrant { client_secret, .. } => Some(client_secret),
        }
    }

    #[must_use]
    pub fn grant_type(&self) -> &Credential {
        match self {
            Self::Pkce { grant_type, .. } | Self::DirectGrant { grant_type, .. } => grant_type,
        }
    }

    /// Builds the browser URL that starts a PKCE authorization.
    ///
    /// `code_challenge` must be the base64url-encoded SHA-256 of the code
    /// verifier the caller keeps for the token exchange.
    ///
    /// # Errors
    ///
    /// Returns a validation error if this is not a PKCE flow or the
    /// authorization endpoint is not a valid URL.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<Url> {
        match self {
            Self::Pkce {
                authorization_endpoint,
                client_id,
                redirect_url,
                scope,
                response_type,
                ..
            } => {
                let mut url = authorization_endpoint.url()?;
                url.query_pairs_mut()
                    .append_pair("response_type", response_type.value())
                    .append_pair("client_id", client_id.value())
                    .append_pair("redirect_uri", redirect_url.value())
                    .append_pair("scope", scope.value())
                    .append_pair("state", state)
                    .append_pair("code_challenge", code_challenge)
                    .append_pair("code_challenge_method", "S256");
                Ok(url)
            }
            Self::DirectGrant { .. } => Err(Error::validation(
                "direct grant clients have no authorization endpoint",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_variant_per_profile() {
        let secret = Credential::new("dev", "prod");
        assert_eq!(secret.value_for(BuildProfile::Debug), "dev");
        assert_eq!(secret.value_for(BuildProfile::Release), "prod");
        assert_eq!(secret.value(), secret.value_for(BuildProfile::current()));
    }

    #[test]
    fn debug_output_is_redacted() {
        let secret = Credential::same("hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
    }

    #[test]
    fn deserializes_direct_grant() {
        let flow: OidcAuthenticationFlow = toml::from_str(
            r#"
            flow = "direct_grant"
            token_endpoint = "https://id.example.com/token"
            client_id = "mobile"
            client_secret = { debug = "a", release = "b" }
            grant_type = "password"
            "#,
        )
        .unwrap();

        assert_eq!(flow.client_id().value(), "mobile");
        let secret = flow.client_secret().unwrap();
        assert_eq!(secret.value_for(BuildProfile::Debug), "a");
        assert_eq!(secret.value_for(BuildProfile::Release), "b");
    }

    #[test]
    fn pkce_has_no_secret_and_builds_authorization_url() {
        let flow = OidcAuthenticationFlow::Pkce {
            authorization_endpoint: Credential::same("https://id.example.com/auth"),
            token_endpoint: Credential::same("https://id.example.com/token"),
            client_id: Credential::same("web"),
            redirect_url: Credential::same("app://callback"),
            scope: Credential::same("openid profile"),
            grant_type: Credential::same("authorization_code"),
            response_type: Credential::same("code"),
        };
        assert!(flow.client_secret().is_none());

        let url = flow.authorization_url("xyz", "challenge").unwrap();
        let pairs: Vec<_> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".to_owned(), "web".to_owned())));
        assert!(pairs.contains(&("code_challenge_method".to_owned(), "S256".to_owned())));
        assert!(pairs.contains(&("scope".to_owned(), "openid profile".to_owned())));
    }
}
