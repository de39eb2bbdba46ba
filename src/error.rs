//! Error handling for clientkit.
//!
//! Provides a unified error type that pairs a domain category with the
//! underlying failure, plus conversions from the errors of the crates this
//! library is built on.
//!
//! # Error Categories
//!
//! Domain errors:
//! * Validation failures (bad input, bad configuration)
//! * Missing resources ("not exists")
//! * User errors (something the end user has to fix)
//! * Parse errors (JSON, dates)
//! * Generic errors that fit nowhere else
//!
//! Transport errors:
//! * Authentication failures (401)
//! * Permission failures (403)
//! * Unavailable services and network failures
//! * Timeouts and cancellation
//!
//! HTTP responses with a status code are classified separately by
//! [`HttpErr`](crate::http_err::HttpErr), which converts into this type.
//!
//! # Example
//!
//! ```rust
//! use clientkit::error::{Error, ErrorKind, Result};
//!
//! fn find(id: u64) -> Result<()> {
//!     if id == 0 {
//!         return Err(Error::not_exists("no record with id 0"));
//!     }
//!     Ok(())
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// # Returns
    /// * `Some(&E)` - If the underlying error is of type `E`
    /// * `None` - If the underlying error is not of type `E`
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Standard result type for clientkit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories.
///
/// The first group mirrors the domain taxonomy that user interfaces branch
/// on; the second group covers transport plumbing.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// Input or configuration did not pass validation.
    #[error("validation failed")]
    Validation,

    /// The requested resource does not exist.
    #[error("does not exist")]
    NotExists,

    /// Placeholder for failures without a better category.
    #[error("generic error")]
    Generic,

    /// Something the user has to correct.
    #[error("user error")]
    User,

    /// JSON could not be parsed into the expected shape.
    #[error("JSON parse error")]
    JsonParse,

    /// A date or timestamp could not be parsed.
    #[error("date parse error")]
    DateParse,

    /// HTTP Mapping: 401 Unauthorized
    #[error("no valid authentication credentials")]
    Unauthenticated,

    /// HTTP Mapping: 403 Forbidden
    #[error("permission denied")]
    PermissionDenied,

    /// HTTP Mapping: 503 Service Unavailable
    #[error("service unavailable")]
    Unavailable,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded,

    /// HTTP Mapping: 499 Client Closed Request
    #[error("operation was cancelled")]
    Cancelled,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal,
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::NotExists, "user profile not found");
    /// assert_eq!(err.kind, ErrorKind::NotExists);
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Creates an error for input that failed validation.
    ///
    /// Use for malformed configuration values, invalid arguments and
    /// out-of-range values.
    pub fn validation<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Validation, error)
    }

    /// Creates an error for a resource that does not exist.
    pub fn not_exists<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NotExists, error)
    }

    /// Creates an error that fits no other category.
    pub fn generic<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Generic, error)
    }

    /// Creates an error the end user has to act upon.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::user("please log in again");
    /// assert_eq!(err.kind, ErrorKind::User);
    /// ```
    pub fn user<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::User, error)
    }

    /// Creates an error for JSON that could not be decoded.
    pub fn json_parse<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::JsonParse, error)
    }

    /// Creates an error for a date or timestamp that could not be parsed.
    pub fn date_parse<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DateParse, error)
    }

    /// Creates an error for authentication failures.
    ///
    /// Maps to HTTP 401 Unauthorized. Use when:
    /// * No token is stored
    /// * The refresh token was rejected
    /// * The token endpoint returned an unusable response
    pub fn unauthenticated<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unauthenticated, error)
    }

    /// Creates an error for permission denied conditions.
    pub fn permission_denied<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::PermissionDenied, error)
    }

    /// Creates an error for unreachable or closed services.
    ///
    /// Maps to HTTP 503 Service Unavailable. User interfaces treat this
    /// kind as "offline".
    pub fn unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unavailable, error)
    }

    /// Creates an error for operations that exceeded their deadline.
    pub fn deadline_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DeadlineExceeded, error)
    }

    /// Creates an error for cancelled operations.
    pub fn cancelled<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Cancelled, error)
    }

    /// Creates an error for internal errors.
    ///
    /// Use for unexpected internal errors that shouldn't occur during
    /// normal operation.
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }
}

/// Returns the underlying error source.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display, showing both kind and details.
///
/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
///
/// Maps standard IO errors to their logical equivalents:
/// * `NotFound` -> `NotExists`
/// * `PermissionDenied` -> `PermissionDenied`
/// * `ConnectionRefused` -> `Unavailable`
/// * etc.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_exists(err),
            PermissionDenied => Self::permission_denied(err),
            AddrNotAvailable | ConnectionRefused | NotConnected | BrokenPipe
            | ConnectionReset | ConnectionAborted => Self::unavailable(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput => Self::validation(err),
            InvalidData | UnexpectedEof => Self::json_parse(err),
            _ => Self::generic(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// Maps HTTP errors based on their nature:
/// * Decode errors -> `JsonParse`
/// * Builder errors -> `Internal`
/// * Connect and request errors -> `Unavailable`
/// * Timeout errors -> `DeadlineExceeded`
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::json_parse(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        if err.is_connect() || err.is_request() || err.is_body() {
            return Self::unavailable(err);
        }

        Self::generic(err)
    }
}

/// Converts WebSocket errors into appropriate error kinds.
///
/// Maps WebSocket errors based on their type:
/// * `ConnectionClosed`, `AlreadyClosed` and I/O errors -> `Unavailable`
/// * `Url` and `Capacity` -> `Validation`
/// * `Http` with 401 -> `Unauthenticated`
/// * etc.
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error::*;
        match err {
            ConnectionClosed | AlreadyClosed => Self::unavailable(err),
            Io(err) => Self::unavailable(err),
            Http(ref response) if response.status() == http::StatusCode::UNAUTHORIZED => {
                Self::unauthenticated(err.to_string())
            }
            Url(err) => Self::validation(err),
            Capacity(err) => Self::validation(err),
            AttackAttempt => Self::permission_denied(err),
            _ => Self::unavailable(err.to_string()),
        }
    }
}

/// Converts JSON errors to `JsonParse`.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::json_parse(err)
    }
}

/// Converts TOML errors to `Validation`.
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::validation(err)
    }
}

/// Converts header size errors to `Validation`.
impl From<http::header::MaxSizeReached> for Error {
    fn from(e: http::header::MaxSizeReached) -> Self {
        Self::validation(e.to_string())
    }
}

/// Converts invalid header errors to `Internal`.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts URL parsing errors to `Validation`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::validation(e.to_string())
    }
}

/// Converts date parsing errors to `DateParse`.
impl From<time::error::Parse> for Error {
    fn from(e: time::error::Parse) -> Self {
        Self::date_parse(e)
    }
}

/// Converts out-of-range date components to `DateParse`.
impl From<time::error::ComponentRange> for Error {
    fn from(e: time::error::ComponentRange) -> Self {
        Self::date_parse(e)
    }
}

/// Converts date formatting errors to `Internal`.
impl From<time::error::Format> for Error {
    fn from(e: time::error::Format) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts Base64 decoding errors to `Validation`.
impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Self::validation(e.to_string())
    }
}

/// Converts timeout errors to `DeadlineExceeded`.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::deadline_exceeded(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_details() {
        let err = Error::not_exists("no such page");
        assert_eq!(err.to_string(), "does not exist: no such page");
    }

    #[test]
    fn io_errors_map_to_domain_kinds() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.kind, ErrorKind::NotExists);

        let err = Error::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert_eq!(err.kind, ErrorKind::Unavailable);
    }

    #[test]
    fn json_errors_are_parse_errors() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err = Error::from(err);
        assert_eq!(err.kind, ErrorKind::JsonParse);
        assert!(err.downcast::<serde_json::Error>().is_some());
    }
}
