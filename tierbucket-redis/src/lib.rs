//! Redis primary tier for `tierbucket` (companion crate).
//!
//! [`RedisCache`] implements [`tierbucket::CacheClient`] over Redis hashes, so it plugs into
//! [`tierbucket::TieredRateLimiter`] as the shared tier. Token-authenticated deployments
//! supply a [`TokenRefresher`]; the cache reconnects whenever the token it hands out changes.
//!
//! Connections are opened lazily and every connect and command is bounded by the timeouts in
//! [`RedisSettings`], so an unreachable server costs a decision a bounded wait rather than
//! stalling it.

pub mod client;
pub mod credential;

pub use client::{
    RedisCache, RedisSettings, DEFAULT_CONNECT_RETRIES, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_RESPONSE_TIMEOUT,
};
pub use credential::{
    AccessToken, CredentialSource, FileCredential, StaticCredential, TokenRefresher, DEFAULT_REFRESH_WINDOW,
};
