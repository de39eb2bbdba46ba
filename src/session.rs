//! Session channel over a messaging connection.
//!
//! A [`SessionChannel`] owns at most one live connection. Every operation
//! goes through [`SessionChannel::with_session`], which connects lazily,
//! reuses a healthy connection and replaces a stale or dead one. While
//! connected, a background task sends a heartbeat on a fixed interval.
//!
//! # States
//!
//! ```text
//!              connect ok
//! NoSession ---------------> Connected <-----+
//!     ^                        |   |         | reconnect
//!     |   failure or close     |   | stale   |
//!     +------------------------+   +----> Stale
//! ```
//!
//! # Failure Policy
//!
//! Session maintenance is best-effort. Failures while connecting or inside
//! the callback are logged, tear the connection down and are reported as
//! [`Outcome::Degraded`] instead of an error. The next call connects
//! afresh.
//!
//! # Concurrency
//!
//! State is guarded by an async mutex that is held while connecting, so
//! concurrent callers wait for a connect in flight and then share the
//! resulting connection. Callbacks run outside the lock, and a failing
//! callback only tears down the connection it was handed.

use std::{future::Future, mem, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::Mutex,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};

/// A live messaging connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Whether the underlying transport is still open.
    fn is_alive(&self) -> bool;

    /// Sends a lightweight keep-alive frame.
    async fn heartbeat(&self) -> Result<()>;

    /// Closes the connection gracefully. Calling this more than once is
    /// not an error.
    async fn disconnect(&self) -> Result<()>;
}

/// Opens messaging connections.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection + 'static;

    async fn connect(&self, url: &Url) -> Result<Self::Connection>;
}

/// Observable state of a [`SessionChannel`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SessionState {
    NoSession,
    Connected,
    Stale,
}

/// Result of [`SessionChannel::with_session`].
#[derive(Debug)]
#[must_use]
pub enum Outcome<T> {
    /// The callback ran to completion.
    Done(T),

    /// The session was unavailable or the callback failed. The failure has
    /// been logged and the connection torn down.
    Degraded(Error),
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// The callback's value, discarding any failure.
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Degraded(_) => None,
        }
    }

    /// Turns a degraded outcome back into an error.
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Done(value) => Ok(value),
            Self::Degraded(e) => Err(e),
        }
    }
}

struct Live<C> {
    connection: Arc<C>,
    url: Url,
    keep_alive: CancellationToken,
}

impl<C: Connection> Live<C> {
    /// Stops the keep-alive and disconnects, ignoring failures.
    async fn dispose(self) {
        self.keep_alive.cancel();
        if let Err(e) = self.connection.disconnect().await {
            debug!("ignoring failure to disconnect from {}: {e}", self.url);
        }
    }
}

enum State<C> {
    NoSession,
    Connected(Live<C>),
    Stale(Live<C>),
}

pub struct SessionChannel<C: Connector> {
    connector: C,

    /// Endpoint used when `with_session` is not given one.
    url: Url,

    heartbeat_interval: Duration,

    state: Mutex<State<C::Connection>>,

    /// Parent of every keep-alive task; cancelled on close.
    scope: CancellationToken,
}

impl<C: Connector> SessionChannel<C> {
    #[must_use]
    pub fn new(connector: C, url: Url, heartbeat_interval: Duration) -> Self {
        Self {
            connector,
            url,
            heartbeat_interval,
            state: Mutex::new(State::NoSession),
            scope: CancellationToken::new(),
        }
    }

    pub async fn state(&self) -> SessionState {
        match &*self.state.lock().await {
            State::NoSession => SessionState::NoSession,
            State::Connected(_) => SessionState::Connected,
            State::Stale(_) => SessionState::Stale,
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// Runs `callback` with a live connection to `url`, or to the
    /// configured endpoint if `url` is `None`.
    ///
    /// Failures are not returned as errors: they are logged, the
    /// connection is torn down and the failure is reported as
    /// [`Outcome::Degraded`].
    pub async fn with_session<T, F, Fut>(&self, url: Option<&Url>, callback: F) -> Outcome<T>
    where
        F: FnOnce(Arc<C::Connection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let url = url.unwrap_or(&self.url);
        let connection = match self.acquire(url).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("session to {url} unavailable: {e}");
                return Outcome::Degraded(e);
            }
        };

        match callback(Arc::clone(&connection)).await {
            Ok(value) => Outcome::Done(value),
            Err(e) => {
                warn!("session operation failed, dropping connection: {e}");
                self.teardown(&connection).await;
                Outcome::Degraded(e)
            }
        }
    }

    /// Flags the current connection for replacement on next use.
    pub async fn mark_stale(&self) {
        let mut state = self.state.lock().await;
        *state = match mem::replace(&mut *state, State::NoSession) {
            State::Connected(live) => {
                debug!("session to {} marked stale", live.url);
                State::Stale(live)
            }
            other => other,
        };
    }

    /// Disconnects and stops all background work. Further calls to
    /// `with_session` are rejected. Calling this more than once is not an
    /// error.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        match mem::replace(&mut *state, State::NoSession) {
            State::Connected(live) | State::Stale(live) => {
                info!("closing session to {}", live.url);
                live.dispose().await;
            }
            State::NoSession => {}
        }
        self.scope.cancel();
    }

    /// Returns a live connection to `url`, connecting if needed.
    async fn acquire(&self, url: &Url) -> Result<Arc<C::Connection>> {
        let mut state = self.state.lock().await;
        if self.is_closed() {
            return Err(Error::cancelled("session channel is closed"));
        }

        match mem::replace(&mut *state, State::NoSession) {
            State::Connected(live) if live.url == *url && live.connection.is_alive() => {
                let connection = Arc::clone(&live.connection);
                *state = State::Connected(live);
                return Ok(connection);
            }
            State::Connected(live) | State::Stale(live) => {
                debug!("recycling session to {}", live.url);
                live.dispose().await;
            }
            State::NoSession => {}
        }

        // State stays `NoSession` if connecting fails or is cancelled.
        debug!("connecting to {url}");
        let connection = Arc::new(self.connector.connect(url).await?);
        let keep_alive = self.spawn_keep_alive(&connection);
        info!("session to {url} established");

        *state = State::Connected(Live {
            connection: Arc::clone(&connection),
            url: url.clone(),
            keep_alive,
        });

        Ok(connection)
    }

    /// Drops `connection` if it is still the current one.
    async fn teardown(&self, connection: &Arc<C::Connection>) {
        let mut state = self.state.lock().await;
        let current = match &*state {
            State::Connected(live) | State::Stale(live) => {
                Arc::ptr_eq(&live.connection, connection)
            }
            State::NoSession => false,
        };

        if current {
            if let State::Connected(live) | State::Stale(live) =
                mem::replace(&mut *state, State::NoSession)
            {
                live.dispose().await;
            }
        }
    }

    fn spawn_keep_alive(&self, connection: &Arc<C::Connection>) -> CancellationToken {
        let token = self.scope.child_token();
        let cancelled = token.clone();
        let connection = Arc::clone(connection);
        let period = self.heartbeat_interval;

        tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    () = cancelled.cancelled() => break,

                    _ = interval.tick() => {
                        match connection.heartbeat().await {
                            Ok(()) => trace!("heartbeat sent"),
                            Err(e) => error!("failed to send heartbeat: {e}"),
                        }
                    }
                }
            }

            trace!("keep-alive stopped");
        });

        token
    }
}
