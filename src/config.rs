//! Client configuration.
//!
//! Loaded from a TOML file; everything except the messaging endpoint and
//! the `[oidc]` table has a default.
//!
//! ```toml
//! messaging_url = "wss://api.example.com/ws"
//! heartbeat_interval = 10
//! request_timeout = 30
//! store_dir = "/var/lib/clientkit"
//!
//! [oidc]
//! flow = "pkce"
//! authorization_endpoint = "https://id.example.com/auth"
//! token_endpoint = { debug = "https://id.staging.example.com/token", release = "https://id.example.com/token" }
//! client_id = "mobile"
//! redirect_url = "app://callback"
//! scope = "openid profile"
//! grant_type = "authorization_code"
//! response_type = "code"
//! ```

use std::{fs, num::NonZeroU32, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use url::Url;

use crate::{
    credential::OidcAuthenticationFlow,
    error::{Error, Result},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// STOMP-over-WebSocket endpoint
    pub messaging_url: Url,

    /// Period of the session keep-alive
    pub heartbeat_interval: Duration,

    /// `heart-beat` header values in milliseconds: what we send, what we
    /// want to receive
    pub heartbeat_negotiation: (u32, u32),

    pub request_timeout: Duration,
    pub connect_timeout: Duration,

    /// Outbound requests allowed per `rate_limit_interval`
    pub requests_per_interval: NonZeroU32,
    pub rate_limit_interval: Duration,

    pub user_agent: String,

    /// Directory of the file-backed token store
    pub store_dir: PathBuf,

    pub oidc: OidcAuthenticationFlow,
}

#[serde_as]
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    messaging_url: Url,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "defaults::heartbeat_interval")]
    heartbeat_interval: Duration,

    #[serde(default = "defaults::heartbeat_negotiation")]
    heartbeat_negotiation: (u32, u32),

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "defaults::request_timeout")]
    request_timeout: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "defaults::connect_timeout")]
    connect_timeout: Duration,

    #[serde(default = "defaults::requests_per_interval")]
    requests_per_interval: u32,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "defaults::rate_limit_interval")]
    rate_limit_interval: Duration,

    #[serde(default)]
    user_agent: Option<String>,

    #[serde(default = "defaults::store_dir")]
    store_dir: PathBuf,

    oidc: OidcAuthenticationFlow,
}

mod defaults {
    use std::{path::PathBuf, time::Duration};

    pub(super) fn heartbeat_interval() -> Duration {
        Duration::from_secs(10)
    }

    pub(super) fn heartbeat_negotiation() -> (u32, u32) {
        (10_000, 10_000)
    }

    pub(super) fn request_timeout() -> Duration {
        Duration::from_secs(30)
    }

    pub(super) fn connect_timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub(super) fn requests_per_interval() -> u32 {
        50
    }

    pub(super) fn rate_limit_interval() -> Duration {
        Duration::from_secs(5)
    }

    pub(super) fn store_dir() -> PathBuf {
        PathBuf::from(".clientkit")
    }
}

impl Config {
    /// Configuration files larger than this are refused.
    const MAX_FILE_SIZE: u64 = 64 * 1024;

    /// Creates a configuration with defaults for everything but the
    /// endpoints.
    ///
    /// # Errors
    ///
    /// Returns a validation error if no valid `User-Agent` can be built.
    pub fn new(messaging_url: Url, oidc: OidcAuthenticationFlow) -> Result<Self> {
        Ok(Self {
            messaging_url,
            heartbeat_interval: defaults::heartbeat_interval(),
            heartbeat_negotiation: defaults::heartbeat_negotiation(),
            request_timeout: defaults::request_timeout(),
            connect_timeout: defaults::connect_timeout(),
            requests_per_interval: NonZeroU32::new(defaults::requests_per_interval())
                .ok_or_else(|| Error::internal("default rate limit is zero"))?,
            rate_limit_interval: defaults::rate_limit_interval(),
            user_agent: Self::default_user_agent()?,
            store_dir: defaults::store_dir(),
            oidc,
        })
    }

    /// Loads and validates a configuration file.
    pub fn from_file(path: &str) -> Result<Self> {
        // Prevent out-of-memory condition: configuration should be small.
        let attributes = fs::metadata(path)?;
        if attributes.len() > Self::MAX_FILE_SIZE {
            return Err(Error::validation(format!("{path} is too large")));
        }

        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents)?;

        if !matches!(file.messaging_url.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "messaging_url must be a ws:// or wss:// URL, not {}",
                file.messaging_url
            )));
        }

        if file.heartbeat_interval.is_zero()
            || file.request_timeout.is_zero()
            || file.connect_timeout.is_zero()
            || file.rate_limit_interval.is_zero()
        {
            return Err(Error::validation("intervals and timeouts must be non-zero"));
        }

        let requests_per_interval = NonZeroU32::new(file.requests_per_interval)
            .ok_or_else(|| Error::validation("requests_per_interval must be non-zero"))?;

        // Fail early on endpoints that would only break at refresh time.
        file.oidc.token_endpoint().url()?;
        if let OidcAuthenticationFlow::Pkce {
            authorization_endpoint,
            ..
        } = &file.oidc
        {
            authorization_endpoint.url()?;
        }

        let user_agent = match file.user_agent {
            Some(user_agent) => user_agent,
            None => Self::default_user_agent()?,
        };

        Ok(Self {
            messaging_url: file.messaging_url,
            heartbeat_interval: file.heartbeat_interval,
            heartbeat_negotiation: file.heartbeat_negotiation,
            request_timeout: file.request_timeout,
            connect_timeout: file.connect_timeout,
            requests_per_interval,
            rate_limit_interval: file.rate_limit_interval,
            user_agent,
            store_dir: file.store_dir,
            oidc: file.oidc,
        })
    }

    /// Builds `<name>/<version> (Rust; <os>/<os version>)`.
    fn default_user_agent() -> Result<String> {
        let app_name = env!("CARGO_PKG_NAME");
        let app_version = env!("CARGO_PKG_VERSION");

        let os_name = match std::env::consts::OS {
            "macos" => "osx",
            other => other,
        };
        let os_version = sysinfo::System::os_version().unwrap_or_else(|| String::from("0"));

        // Additional `User-Agent` string checks on top of `reqwest::HeaderValue`.
        let illegal_chars = |chr| chr == '/' || chr == ';';
        if os_name.is_empty()
            || os_name.contains(illegal_chars)
            || os_version.is_empty()
            || os_version.contains(illegal_chars)
        {
            return Err(Error::validation(format!(
                "os name and/or version invalid (\"{os_name}\"; \"{os_version}\")"
            )));
        }

        let user_agent = format!("{app_name}/{app_version} (Rust; {os_name}/{os_version})");
        trace!("user agent: {user_agent}");
        Ok(user_agent)
    }
}
