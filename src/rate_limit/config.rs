use crate::error::BucketConfigError;
use chrono::TimeDelta;
use std::time::Duration;

/// Default burst size for a bucket.
pub const DEFAULT_BURST_SIZE: u32 = 10;
/// Default refill interval: one token per minute.
pub const DEFAULT_REFILL_INTERVAL: Duration = Duration::from_secs(60);

/// Validated, immutable configuration for one class of rate-limited resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    burst_size: u32,
    refill_interval: Duration,
}

impl BucketConfig {
    /// Create a config; both values must be strictly positive.
    ///
    /// # Examples
    /// ```
    /// use tierbucket::BucketConfig;
    /// use std::time::Duration;
    /// let config = BucketConfig::new(10, Duration::from_secs(30)).unwrap();
    /// assert_eq!(config.burst_size(), 10);
    /// assert!(BucketConfig::new(0, Duration::from_secs(30)).is_err());
    /// ```
    pub fn new(burst_size: u32, refill_interval: Duration) -> Result<Self, BucketConfigError> {
        if burst_size == 0 {
            return Err(BucketConfigError::InvalidBurstSize { provided: burst_size });
        }
        if refill_interval.is_zero() || TimeDelta::from_std(refill_interval).is_err() {
            return Err(BucketConfigError::InvalidRefillInterval(refill_interval));
        }
        Ok(Self { burst_size, refill_interval })
    }

    /// Refill `tokens_per_minute` tokens every minute, spaced evenly.
    pub fn per_minute(tokens_per_minute: u32, burst_size: u32) -> Result<Self, BucketConfigError> {
        if tokens_per_minute == 0 {
            return Err(BucketConfigError::InvalidRefillInterval(Duration::ZERO));
        }
        Self::new(burst_size, DEFAULT_REFILL_INTERVAL / tokens_per_minute)
    }

    /// Maximum number of tokens the bucket holds.
    pub fn burst_size(&self) -> u32 {
        self.burst_size
    }

    /// Time it takes to add one token.
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    // Validated in `new`, so the conversion cannot fail here.
    pub(crate) fn interval_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.refill_interval).unwrap_or(TimeDelta::MAX)
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self { burst_size: DEFAULT_BURST_SIZE, refill_interval: DEFAULT_REFILL_INTERVAL }
    }
}
