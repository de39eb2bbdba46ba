//! JWT payload extraction.
//!
//! Reads the claims of compact JWTs issued by the identity provider. The
//! signature is not verified: tokens come straight from the token endpoint
//! over TLS and are only inspected for display and expiry decisions.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Registered and commonly used OIDC claims.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,

    /// Expiry as seconds since the epoch
    #[serde(default)]
    pub exp: Option<i64>,

    /// Issue time as seconds since the epoch
    #[serde(default)]
    pub iat: Option<i64>,

    #[serde(default)]
    pub preferred_username: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub session_state: Option<String>,
}

impl Claims {
    /// Whether `exp` lies in the past. Tokens without `exp` never expire.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.exp
            .is_some_and(|exp| OffsetDateTime::now_utc().unix_timestamp() >= exp)
    }

    pub fn expires_at(&self) -> Result<Option<OffsetDateTime>> {
        self.exp
            .map(OffsetDateTime::from_unix_timestamp)
            .transpose()
            .map_err(Into::into)
    }
}

/// Decodes the payload segment of `token` as `T`.
///
/// # Errors
///
/// * Validation error if the token does not have three segments
/// * JSON parse error if the payload is not base64url-encoded JSON of
///   shape `T`
pub fn payload<T>(token: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::validation("JWT must have three segments"));
    };

    // Some issuers pad their segments even though the format forbids it.
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(Error::json_parse)?;
    serde_json::from_slice(&decoded).map_err(Into::into)
}

/// Decodes the standard claims of `token`.
pub fn claims(token: &str) -> Result<Claims> {
    payload(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn token(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn extracts_claims() {
        let claims = claims(&token(r#"{"sub":"42","exp":1,"preferred_username":"ada"}"#)).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("42"));
        assert_eq!(claims.preferred_username.as_deref(), Some("ada"));
        assert!(claims.is_expired());
    }

    #[test]
    fn tolerates_padding() {
        let padded = format!("h.{}.s", base64::engine::general_purpose::URL_SAFE.encode("{}"));
        assert!(padded.contains('='));
        assert_eq!(claims(&padded).unwrap(), Claims::default());
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert_eq!(claims("a.b").unwrap_err().kind, ErrorKind::Validation);
        assert_eq!(claims("a.b.c.d").unwrap_err().kind, ErrorKind::Validation);
        assert_eq!(claims("a.!!!.c").unwrap_err().kind, ErrorKind::JsonParse);
        assert_eq!(
            claims(&token("not json")).unwrap_err().kind,
            ErrorKind::JsonParse
        );
    }
}
