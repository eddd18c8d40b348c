//! Rate limiting primitives.
//!
//! This module provides the building blocks for rate limiting:
//! - [`TokenBucket`]: pure token-bucket math over a persisted [`BucketSnapshot`].
//! - [`TieredRateLimiter`]: runs the bucket against a primary and a secondary cache tier.
//! - [`RateLimitLayer`]: Tower middleware that enforces the limit.
//! - [`Decision`]: the result of a rate limit check (Allowed/Denied).
//!
//! # Architecture
//!
//! - **Logic**: `TokenBucket` rebuilds a bucket from its snapshot and the current time; it
//!   never holds state between calls.
//! - **Storage**: snapshots live in [`CacheClient`](crate::cache::CacheClient)s; the limiter
//!   holds one per tier and treats them interchangeably.
//! - **Middleware**: `RateLimitLayer` wraps your service. It doesn't know *how* limiting
//!   works, only that it should ask a [`RateLimiter`].

use crate::error::{LimiterError, Tier};
use std::time::Duration;

pub mod config;
pub mod middleware;
pub mod snapshot;
pub mod tiered;
pub mod token_bucket;

pub use config::{BucketConfig, DEFAULT_BURST_SIZE, DEFAULT_REFILL_INTERVAL};
pub use middleware::{RateLimitError, RateLimitLayer, RateLimitService};
pub use snapshot::{BucketSnapshot, LAST_INCREASE_FIELD, TOKENS_FIELD};
pub use tiered::{FailurePolicy, StandbyMode, TieredRateLimiter};
pub use token_bucket::{TakeOutcome, TokenBucket};

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is allowed to proceed.
    Allowed {
        /// Tokens left after this request, when a tier produced the decision.
        /// `None` when the request was let through by the failure policy.
        remaining: Option<u32>,
    },
    /// The request is denied.
    Denied {
        /// How long the caller should wait before retrying.
        /// Useful for `Retry-After` headers.
        retry_after: Duration,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Advisory wait, only for denials.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Denied { retry_after } => Some(*retry_after),
            Decision::Allowed { .. } => None,
        }
    }

    /// Remaining tokens, if known.
    pub fn remaining(&self) -> Option<u32> {
        match self {
            Decision::Allowed { remaining } => *remaining,
            Decision::Denied { .. } => Some(0),
        }
    }
}

/// A decision plus where it came from and what went wrong on the way.
///
/// The decision is always usable. `advisory` carries the primary tier's error when the answer
/// came from the fallback tier or from the failure policy; it is meant for logging, not for
/// turning into a denial.
#[derive(Debug)]
pub struct DecisionReport {
    pub decision: Decision,
    /// Tier that produced the decision; `None` when the failure policy decided.
    pub served_by: Option<Tier>,
    pub advisory: Option<LimiterError>,
}

impl DecisionReport {
    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }
}

/// Core interface for rate limiting decisions.
///
/// Decouples the middleware and HTTP handlers from the tiered implementation.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Take one token for `key`.
    async fn decide(&self, key: &str, config: &BucketConfig) -> DecisionReport;

    /// Tokens currently available for `key`, without taking one.
    async fn stats(&self, key: &str, config: &BucketConfig) -> Result<u32, LimiterError>;
}
