//! Authenticated HTTP client.
//!
//! Wraps `reqwest::Client` and adds:
//! * outbound rate limiting
//! * bearer token attachment from the [`TokenStore`]
//! * a single transparent token refresh and retry on `401 Unauthorized`
//! * typed JSON helpers whose failures are classified by
//!   [`http_err`](crate::http_err)
//!
//! # Token Refresh
//!
//! When a request comes back with `401`, the client asks the token endpoint
//! for a new access token using the stored refresh token and replays the
//! request once. Refreshes are serialized: callers that fail concurrently
//! with the same stale token wait for the first refresh and reuse its
//! result. Requests with streaming bodies cannot be replayed and return
//! their `401` as-is.
//!
//! # Example
//!
//! ```rust
//! use clientkit::{http::Client, protocol::error_body::ServerErrorBody};
//!
//! let client = Client::new(&config, tokens)?;
//! let me: Profile = client
//!     .get_json::<_, ServerErrorBody>(url)
//!     .await?;
//! ```

use std::{fmt::Debug, time::Duration};

use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Method, Request, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use url::Url;

use crate::{
    config::Config,
    credential::OidcAuthenticationFlow,
    error::{Error, Result},
    http_err::HttpErr,
    protocol::{
        self,
        auth::{Auth, RefreshRequest},
        error_body::{ErrorBody, ServerErrorBody},
    },
    tokens::TokenStore,
};

/// MIME type of request and response bodies.
const APPLICATION_JSON: &str = "application/json";

pub struct Client {
    /// Client without token handling or retries.
    unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,

    tokens: TokenStore,

    flow: OidcAuthenticationFlow,

    /// Held while talking to the token endpoint.
    refreshing: Mutex<()>,
}

impl Client {
    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * the rate limit works out to a zero replenish interval
    /// * the HTTP client cannot be built
    pub fn new(config: &Config, tokens: TokenStore) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .default_headers(headers)
            .user_agent(&config.user_agent)
            .build()?;

        // Rate limit own requests as to not flood the API.
        let replenish_interval = config.rate_limit_interval / config.requests_per_interval.get();
        let quota = Quota::with_period(replenish_interval)
            .ok_or_else(|| Error::validation("rate limit interval is too short"))?
            .allow_burst(config.requests_per_interval);

        Ok(Self {
            unlimited: http_client,
            rate_limiter: governor::RateLimiter::direct(quota),
            tokens,
            flow: config.oidc.clone(),
            refreshing: Mutex::new(()),
        })
    }

    /// The token store requests are authenticated from.
    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Builds a request with specified method, URL and optional JSON body.
    pub fn request(&self, method: Method, url: Url, body: Option<String>) -> Request {
        let mut request = Request::new(method, url);
        if let Some(body) = body {
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
            *request.body_mut() = Some(body.into());
        }
        request
    }

    /// Sends a request with rate limiting only.
    async fn send<E>(&self, request: Request) -> std::result::Result<Response, HttpErr<E>> {
        self.rate_limiter.until_ready().await;
        trace!("{} {}", request.method(), request.url());
        self.unlimited
            .execute(request)
            .await
            .map_err(HttpErr::from_transport)
    }

    /// Executes a request with authentication.
    ///
    /// Attaches the stored access token, if any. On `401 Unauthorized` the
    /// token is refreshed and the request replayed once. Responses are
    /// returned whatever their status; only transport failures and failed
    /// refreshes are errors.
    ///
    /// # Errors
    ///
    /// * [`HttpErr::ConnectionErr`] if the request could not be sent
    /// * [`HttpErr::AuthorizationErr`] if the token could not be refreshed
    pub async fn execute<E>(
        &self,
        mut request: Request,
    ) -> std::result::Result<Response, HttpErr<E>> {
        let auth = self.tokens.load().await;
        let replay = request.try_clone();
        if let Some(auth) = &auth {
            authorize(&mut request, auth).map_err(HttpErr::no_transformation)?;
        }

        let response = self.send(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(mut replay) = replay else {
            debug!("cannot replay streaming request after 401");
            return Ok(response);
        };

        let stale = auth.as_ref().map(|auth| auth.access_token.as_str());
        match self.refresh_after(stale).await {
            Ok(auth) => {
                authorize(&mut replay, &auth).map_err(HttpErr::no_transformation)?;
                self.send(replay).await
            }
            Err(e) => {
                warn!("token refresh failed: {e}");
                Err(HttpErr::no_transformation(e))
            }
        }
    }

    /// Obtains a new access token from the token endpoint and stores it.
    ///
    /// # Errors
    ///
    /// * `Unauthenticated` if there is no refresh token
    /// * the classified [`HttpErr`] if the identity server rejects it
    /// * transport and parsing errors otherwise
    pub async fn refresh(&self) -> Result<Auth> {
        self.refresh_after(None).await
    }

    /// Refreshes unless the stored access token already differs from
    /// `stale`, in which case another caller refreshed in the meantime.
    async fn refresh_after(&self, stale: Option<&str>) -> Result<Auth> {
        let _guard = self.refreshing.lock().await;

        let current = self.tokens.load().await;
        if let (Some(current), Some(stale)) = (&current, stale) {
            if current.access_token != stale {
                debug!("access token was refreshed concurrently");
                return Ok(current.clone());
            }
        }

        let refresh_token = current
            .map(|auth| auth.refresh_token)
            .ok_or_else(|| Error::unauthenticated("no refresh token stored"))?;

        let url = self.flow.token_endpoint().url()?;
        let form = RefreshRequest::new(&self.flow, &refresh_token);
        let request = self.unlimited.post(url.clone()).form(&form).build()?;

        let response = self
            .send::<ServerErrorBody>(request)
            .await
            .map_err(Error::from)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        if !status.is_success() {
            let err = HttpErr::<ServerErrorBody>::from_response(
                status,
                headers,
                body.as_bytes(),
                Some(url),
            );
            return Err(err.into());
        }

        let auth: Auth = protocol::json(&body, "token endpoint")?;
        self.tokens.save(&auth).await?;
        info!("access token refreshed");

        Ok(auth)
    }

    /// Forgets the stored tokens.
    pub async fn logout(&self) -> Result<()> {
        self.tokens.clear().await?;
        info!("logged out");
        Ok(())
    }

    /// `GET`s `url` and decodes the JSON response as `R`.
    ///
    /// # Errors
    ///
    /// Non-success responses and transport failures as classified by
    /// [`HttpErr`].
    pub async fn get_json<R, E>(&self, url: Url) -> std::result::Result<R, HttpErr<E>>
    where
        R: DeserializeOwned + Debug,
        E: ErrorBody,
    {
        let request = self.request(Method::GET, url, None);
        self.json(request).await
    }

    /// `POST`s `body` as JSON and decodes the JSON response as `R`.
    pub async fn post_json<B, R, E>(
        &self,
        url: Url,
        body: &B,
    ) -> std::result::Result<R, HttpErr<E>>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned + Debug,
        E: ErrorBody,
    {
        let body = serde_json::to_string(body).map_err(HttpErr::json_parse)?;
        let request = self.request(Method::POST, url, Some(body));
        self.json(request).await
    }

    /// `PUT`s `body` as JSON and decodes the JSON response as `R`.
    pub async fn put_json<B, R, E>(&self, url: Url, body: &B) -> std::result::Result<R, HttpErr<E>>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned + Debug,
        E: ErrorBody,
    {
        let body = serde_json::to_string(body).map_err(HttpErr::json_parse)?;
        let request = self.request(Method::PUT, url, Some(body));
        self.json(request).await
    }

    /// `DELETE`s `url`, ignoring any response body.
    pub async fn delete<E>(&self, url: Url) -> std::result::Result<(), HttpErr<E>>
    where
        E: ErrorBody,
    {
        let request = self.request(Method::DELETE, url, None);
        self.checked(request).await.map(|_| ())
    }

    async fn json<R, E>(&self, request: Request) -> std::result::Result<R, HttpErr<E>>
    where
        R: DeserializeOwned + Debug,
        E: ErrorBody,
    {
        let origin = request.url().path().to_owned();
        let bytes = self.checked(request).await?;
        match serde_json::from_slice(&bytes) {
            Ok(result) => {
                trace!("{origin}: {result:#?}");
                Ok(result)
            }
            Err(e) => {
                error!("{origin}: failed parsing response ({e})");
                Err(HttpErr::json_parse(e))
            }
        }
    }

    /// Executes `request` and returns the body of a successful response.
    async fn checked<E>(&self, request: Request) -> std::result::Result<Vec<u8>, HttpErr<E>>
    where
        E: ErrorBody,
    {
        let url = request.url().clone();
        let response = self.execute(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(HttpErr::from_transport)?;

        if status.is_success() {
            Ok(bytes.to_vec())
        } else {
            debug!("{url}: {status}");
            Err(HttpErr::from_response(status, headers, &bytes, Some(url)))
        }
    }
}

/// Sets the `Authorization` header of `request` from `auth`.
fn authorize(request: &mut Request, auth: &Auth) -> Result<()> {
    let mut value = HeaderValue::from_str(&auth.bearer())?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}
