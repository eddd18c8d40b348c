//! Cache tiers that hold bucket snapshots.
//!
//! - [`CacheClient`]: the capability both tiers implement. The limiter holds two trait objects
//!   and never looks at the concrete type behind them.
//! - [`ExpiringLocalCache`]: the in-process fallback tier, a heap-indexed store whose entries
//!   expire lazily.
//!
//! The remote tier lives in the `tierbucket-redis` companion crate.

use crate::error::CacheError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

pub mod heap;
pub mod local;

pub use heap::ExpiryHeap;
pub use local::{ExpiringLocalCache, DEFAULT_MAX_ENTRIES};

/// String field map stored under one cache key.
pub type Fields = HashMap<String, String>;

/// Storage capability shared by the primary and secondary tiers.
///
/// Values are opaque field maps; entries expire on their own after the TTL given to
/// [`update`](CacheClient::update).
#[async_trait]
pub trait CacheClient: Send + Sync + std::fmt::Debug {
    /// Short backend name used in logs.
    fn name(&self) -> &str;

    /// Fetch the fields stored under `key`.
    ///
    /// Returns `Ok(None)` on a miss. Backends that cannot tell a miss from an empty map may
    /// return `Ok(Some(empty))`; callers treat both the same.
    async fn get(&self, key: &str) -> Result<Option<Fields>, CacheError>;

    /// Replace the fields under `key` and set its time to live.
    async fn update(&self, key: &str, fields: Fields, ttl: Duration) -> Result<(), CacheError>;
}
