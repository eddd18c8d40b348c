//! Telemetry for the tiered rate limiter.
//!
//! Every decision emits structured [`LimiterEvent`]s describing which tier answered, whether
//! the caller was admitted or throttled, and which tiers failed along the way. Events flow
//! through a [`TelemetrySink`], which is any cloneable `tower::Service<LimiterEvent>`, so
//! standard tower combinators (buffers, filters, timeouts) compose with it. A sink that errors
//! or never becomes ready loses events but never affects a decision.
//!
//! ```rust
//! use tierbucket::telemetry::{LimiterEvent, MemorySink};
//! use tierbucket::Tier;
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! sink.call(LimiterEvent::Admitted { tier: Tier::Primary, remaining: 4 }).await.unwrap();
//! assert_eq!(sink.len(), 1);
//! # }
//! ```

pub mod events;
pub mod sinks;

pub use events::{FailureCause, LimiterEvent};
pub(crate) use sinks::deliver;
pub use sinks::{LogSink, MemorySink, NullSink, TelemetrySink};
