//! Client library for OAuth2/OIDC token management, authenticated HTTP and
//! STOMP-over-WebSocket messaging sessions.
//!
//! # Components
//!
//! * [`credential`] - OIDC flow configuration with per-build secret values
//! * [`tokens`] - persisted access/refresh token pair
//! * [`http`] - HTTP client that attaches and refreshes bearer tokens
//! * [`http_err`] - classification of transport failures
//! * [`stomp`] - STOMP-over-WebSocket connections and subscriptions
//! * [`session`] - single reconnecting messaging session with keep-alive
//! * [`pagination`], [`period`], [`text`] - data helpers for consumers
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod config;
pub mod credential;
pub mod error;
pub mod http;
pub mod http_err;
pub mod jwt;
pub mod pagination;
pub mod period;
pub mod protocol;
pub mod session;
pub mod stomp;
pub mod store;
pub mod text;
pub mod tokens;
