//! Error types for bucket configuration, snapshot decoding, cache tiers and the limiter.
use std::fmt;
use std::time::Duration;

/// Which cache tier an operation ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// The shared (remote) cache, authoritative under normal operation.
    Primary,
    /// The in-process fallback cache.
    Secondary,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Primary => write!(f, "primary"),
            Tier::Secondary => write!(f, "secondary"),
        }
    }
}

/// Errors produced when validating a bucket configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BucketConfigError {
    /// Burst size must be > 0.
    #[error("burst_size must be > 0 (got {provided})")]
    InvalidBurstSize {
        /// Value provided by caller.
        provided: u32,
    },
    /// Refill interval must be > 0 and representable as a wall-clock offset.
    #[error("refill_interval must be > 0 and finite (got {0:?})")]
    InvalidRefillInterval(Duration),
}

/// A stored snapshot could not be decoded.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    /// The field map was non-empty but lacked a required field.
    #[error("snapshot is missing field `{0}`")]
    MissingField(&'static str),
    /// The token count was not a decimal integer.
    #[error("snapshot token count `{0}` is not an integer")]
    InvalidTokenCount(String),
    /// The token count was negative.
    #[error("snapshot token count {0} is negative")]
    NegativeTokenCount(i64),
    /// The last-increase timestamp was not RFC 3339.
    #[error("snapshot timestamp `{value}` is not RFC 3339: {reason}")]
    InvalidTimestamp {
        /// Raw stored value.
        value: String,
        /// Parser message.
        reason: String,
    },
}

/// Errors surfaced by a [`CacheClient`](crate::cache::CacheClient) backend.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The store could not be reached (connection refused, dropped, timed out).
    #[error("cache unreachable: {0}")]
    Unreachable(String),
    /// The store answered but the operation failed.
    #[error("cache operation failed: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Credentials for the store could not be obtained.
    #[error("cache credential refresh failed: {0}")]
    Credential(String),
}

impl CacheError {
    /// Wrap any backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CacheError::Backend(Box::new(err))
    }

    /// True when the store itself could not be reached.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, CacheError::Unreachable(_))
    }
}

/// Errors from one tier's read-compute-write attempt.
///
/// These are advisory on the decision path: the limiter always produces a usable decision and
/// reports the error alongside it.
#[derive(thiserror::Error, Debug)]
pub enum LimiterError {
    /// The tier's cache failed.
    #[error("{tier} tier cache error: {source}")]
    Cache {
        /// Tier that failed.
        tier: Tier,
        /// Underlying cache error.
        #[source]
        source: CacheError,
    },
    /// The tier held a snapshot that could not be decoded.
    #[error("{tier} tier holds a malformed snapshot: {source}")]
    MalformedSnapshot {
        /// Tier holding the corrupt entry.
        tier: Tier,
        /// Decoding error.
        #[source]
        source: SnapshotError,
    },
    /// No cache client is configured for the tier.
    #[error("no cache client configured for the {0} tier")]
    TierNotConfigured(Tier),
}

impl LimiterError {
    /// Tier the error originated from.
    pub fn tier(&self) -> Tier {
        match self {
            LimiterError::Cache { tier, .. } | LimiterError::MalformedSnapshot { tier, .. } => {
                *tier
            }
            LimiterError::TierNotConfigured(tier) => *tier,
        }
    }

    /// True for cache/transport failures (including a missing tier).
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, LimiterError::Cache { .. } | LimiterError::TierNotConfigured(_))
    }

    /// True when the stored state was corrupt.
    pub fn is_malformed(&self) -> bool {
        matches!(self, LimiterError::MalformedSnapshot { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let err = BucketConfigError::InvalidBurstSize { provided: 0 };
        assert!(err.to_string().contains("burst_size"));
        let err = BucketConfigError::InvalidRefillInterval(Duration::ZERO);
        assert!(err.to_string().contains("refill_interval"));
    }

    #[test]
    fn limiter_error_reports_tier_and_source() {
        let err = LimiterError::Cache {
            tier: Tier::Primary,
            source: CacheError::Unreachable("connection refused".into()),
        };
        assert_eq!(err.tier(), Tier::Primary);
        assert!(err.is_infrastructure());
        assert!(!err.is_malformed());
        assert!(err.to_string().contains("primary"));
        assert!(err.source().unwrap().to_string().contains("connection refused"));
    }

    #[test]
    fn malformed_snapshot_is_not_infrastructure() {
        let err = LimiterError::MalformedSnapshot {
            tier: Tier::Secondary,
            source: SnapshotError::NegativeTokenCount(-3),
        };
        assert!(err.is_malformed());
        assert!(!err.is_infrastructure());
        assert_eq!(err.tier(), Tier::Secondary);
        assert!(err.to_string().contains("-3"));
    }

    #[test]
    fn cache_error_backend_wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "WRONGTYPE");
        let err = CacheError::backend(io);
        assert!(!err.is_unreachable());
        assert!(err.source().is_some());
    }
}
