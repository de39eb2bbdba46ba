//! Wire types for the services this library talks to.
//!
//! # Submodules
//!
//! * [`auth`] - OAuth2 token endpoint request and response types
//! * [`error_body`] - structured error bodies returned by API servers
//! * [`stomp`] - STOMP 1.2 frames carried over WebSocket
//!
//! # Shared Functionality
//!
//! [`json`] parses a response body with consistent logging:
//!
//! * TRACE level with the parsed value if successful
//! * TRACE level with the raw JSON if it is valid JSON of another shape
//! * ERROR level if it is not JSON at all

pub mod auth;
pub mod error_body;
pub mod stomp;

use crate::error::Result;
use serde::Deserialize;
use std::fmt::Debug;

/// Parses and logs a JSON response body.
///
/// # Arguments
///
/// * `body` - Response body text to parse
/// * `origin` - Description of the endpoint for logging
///
/// # Errors
///
/// Returns a JSON parse error if the body is not valid JSON or does not
/// match `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing response ({e:?})");
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}
