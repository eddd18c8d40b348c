#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # tierbucket
//!
//! Token-bucket rate limiting whose state lives in caches, not in the process.
//!
//! Each caller's bucket is persisted as a small snapshot (`tokens` plus the instant of the
//! last increase) and rebuilt from that snapshot and the current time on every request.
//! Snapshots are kept in two tiers:
//!
//! - a **primary** tier shared by every instance (Redis, via `tierbucket-redis`), and
//! - a **secondary** tier inside the process ([`ExpiringLocalCache`]), which keeps a warm
//!   copy so an outage of the shared cache degrades to per-instance limiting.
//!
//! ## Features
//!
//! - **Whole-interval refill** with carry-over of partial progress
//! - **Self-expiring snapshots**: each write's TTL is the time until the bucket is full again
//! - **Explicit failure policy**: fail open (default) or fail closed when no tier answers
//! - **Tower middleware** for keyed limiting of any service
//! - **Structured telemetry** through `tower::Service` sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tierbucket::{BucketConfig, ExpiringLocalCache, TieredRateLimiter};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = TieredRateLimiter::local_only(Arc::new(ExpiringLocalCache::new()));
//!     let config = BucketConfig::new(10, Duration::from_secs(6)).unwrap();
//!
//!     let report = limiter.get_decision("client-42", &config).await;
//!     assert!(report.is_allowed());
//!     assert_eq!(limiter.get_stats("client-42", &config).await.unwrap(), 9);
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod error;
pub mod rate_limit;
pub mod telemetry;

// Re-exports
pub use cache::{CacheClient, ExpiringLocalCache, ExpiryHeap, Fields};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BucketConfigError, CacheError, LimiterError, SnapshotError, Tier};
pub use rate_limit::{
    BucketConfig, BucketSnapshot, Decision, DecisionReport, FailurePolicy, RateLimitError,
    RateLimitLayer, RateLimitService, RateLimiter, StandbyMode, TakeOutcome, TieredRateLimiter,
    TokenBucket,
};
pub use telemetry::{FailureCause, LimiterEvent, LogSink, MemorySink, NullSink, TelemetrySink};
