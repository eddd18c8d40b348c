use crate::error::{LimiterError, Tier};
use std::fmt;
use std::time::Duration;

/// Events emitted by the tiered limiter while deciding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// A tier admitted the caller and consumed a token.
    Admitted {
        /// Tier whose decision was returned.
        tier: Tier,
        /// Tokens left after this request.
        remaining: u32,
    },
    /// A tier found the bucket empty.
    Throttled {
        /// Tier whose decision was returned.
        tier: Tier,
        /// Advisory wait before the next token.
        retry_after: Duration,
    },
    /// A tier's attempt failed.
    TierFailed {
        /// Tier that failed.
        tier: Tier,
        cause: FailureCause,
        /// Rendered error.
        reason: String,
    },
    /// No tier produced a decision and the request was admitted anyway.
    FailedOpen,
    /// No tier produced a decision and the request was rejected.
    FailedClosed {
        /// Wait handed to the caller.
        retry_after: Duration,
    },
}

/// Why a tier produced no decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// No client is configured for the tier; expected for a local-only limiter.
    Unconfigured,
    /// The cache could not be reached or rejected the operation.
    Cache,
    /// The stored snapshot could not be decoded.
    MalformedSnapshot,
}

impl From<&LimiterError> for FailureCause {
    fn from(err: &LimiterError) -> Self {
        match err {
            LimiterError::TierNotConfigured(_) => FailureCause::Unconfigured,
            LimiterError::Cache { .. } => FailureCause::Cache,
            LimiterError::MalformedSnapshot { .. } => FailureCause::MalformedSnapshot,
        }
    }
}

impl LimiterEvent {
    /// A `TierFailed` event describing `err`.
    pub fn tier_failed(err: &LimiterError) -> Self {
        LimiterEvent::TierFailed { tier: err.tier(), cause: err.into(), reason: err.to_string() }
    }

    /// Short machine-friendly name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LimiterEvent::Admitted { .. } => "admitted",
            LimiterEvent::Throttled { .. } => "throttled",
            LimiterEvent::TierFailed { .. } => "tier_failed",
            LimiterEvent::FailedOpen => "failed_open",
            LimiterEvent::FailedClosed { .. } => "failed_closed",
        }
    }
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Admitted { tier, remaining } => {
                write!(f, "Admitted(tier={}, remaining={})", tier, remaining)
            }
            LimiterEvent::Throttled { tier, retry_after } => {
                write!(f, "Throttled(tier={}, retry_after={:?})", tier, retry_after)
            }
            LimiterEvent::TierFailed { tier, cause, reason } => {
                write!(f, "TierFailed(tier={}, cause={:?}, reason={})", tier, cause, reason)
            }
            LimiterEvent::FailedOpen => write!(f, "FailedOpen"),
            LimiterEvent::FailedClosed { retry_after } => {
                write!(f, "FailedClosed(retry_after={:?})", retry_after)
            }
        }
    }
}
