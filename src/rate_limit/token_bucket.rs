use crate::cache::Fields;
use crate::error::SnapshotError;
use crate::rate_limit::config::BucketConfig;
use crate::rate_limit::snapshot::BucketSnapshot;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Lower bound on snapshot TTLs; a zero expiry deletes the key outright in some stores.
const MIN_TTL: Duration = Duration::from_millis(1);

/// Result of taking one token from a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeOutcome {
    /// A token was taken; `snapshot` should be persisted with `ttl`.
    Taken {
        /// State after the take.
        snapshot: BucketSnapshot,
        /// Time until the bucket would be full again, i.e. until the snapshot is redundant.
        ttl: Duration,
    },
    /// The bucket is empty. Nothing should be written back.
    Exhausted {
        /// Time until the next single token is added.
        retry_after: Duration,
    },
}

/// Token bucket whose state is rebuilt from a snapshot on every call.
///
/// Tokens are only ever added in whole refill intervals and the last-increase instant moves
/// forward by exactly the intervals consumed, so partial progress toward the next token
/// carries over between calls.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    config: BucketConfig,
}

impl TokenBucket {
    pub fn new(config: BucketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Reconstruct the bucket as of `now` without consuming anything.
    ///
    /// A missing snapshot is a full bucket whose refill clock starts at `now`.
    pub fn peek(&self, previous: Option<&BucketSnapshot>, now: DateTime<Utc>) -> BucketSnapshot {
        let burst = self.config.burst_size();
        let Some(previous) = previous else {
            return BucketSnapshot::new(burst, now);
        };

        let elapsed = now.signed_duration_since(previous.last_increase);
        if elapsed <= TimeDelta::zero() {
            // Clock skew between instances: no refill, keep the stored refill clock.
            return BucketSnapshot::new(previous.tokens.min(burst), previous.last_increase);
        }

        let (intervals, advance) = whole_intervals(elapsed, self.config.refill_interval());
        if intervals == 0 {
            return BucketSnapshot::new(previous.tokens.min(burst), previous.last_increase);
        }

        let tokens = (i128::from(previous.tokens) + intervals).min(i128::from(burst)) as u32;
        // advance <= elapsed, so this lands in (now - interval, now].
        let last_increase =
            previous.last_increase.checked_add_signed(advance).unwrap_or(previous.last_increase);

        BucketSnapshot::new(tokens, last_increase)
    }

    /// Decode `fields` and reconstruct. Corrupt fields are an error, never a reset.
    pub fn peek_fields(
        &self,
        fields: Option<&Fields>,
        now: DateTime<Utc>,
    ) -> Result<BucketSnapshot, SnapshotError> {
        let previous = decode(fields)?;
        Ok(self.peek(previous.as_ref(), now))
    }

    /// Reconstruct, then take one token.
    pub fn take_token(&self, previous: Option<&BucketSnapshot>, now: DateTime<Utc>) -> TakeOutcome {
        let current = self.peek(previous, now);
        let next_token_at = current
            .last_increase
            .checked_add_signed(self.config.interval_delta())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        if current.tokens == 0 {
            return TakeOutcome::Exhausted { retry_after: time_until(next_token_at, now) };
        }

        let tokens = current.tokens - 1;
        let missing = i32::try_from(self.config.burst_size() - tokens).unwrap_or(i32::MAX);
        let full_at = self
            .config
            .interval_delta()
            .checked_mul(missing)
            .and_then(|span| current.last_increase.checked_add_signed(span))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        TakeOutcome::Taken {
            snapshot: BucketSnapshot::new(tokens, current.last_increase),
            ttl: time_until(full_at, now).max(MIN_TTL),
        }
    }

    /// Decode `fields` and take one token.
    pub fn take_token_from_fields(
        &self,
        fields: Option<&Fields>,
        now: DateTime<Utc>,
    ) -> Result<TakeOutcome, SnapshotError> {
        let previous = decode(fields)?;
        Ok(self.take_token(previous.as_ref(), now))
    }
}

/// Number of whole refill intervals in `elapsed`, and the span they cover.
fn whole_intervals(elapsed: TimeDelta, interval: Duration) -> (i128, TimeDelta) {
    const NANOS_PER_SEC: i128 = 1_000_000_000;
    // i128 nanoseconds cover every TimeDelta; i64 nanoseconds stop at ~292 years.
    let elapsed_nanos =
        i128::from(elapsed.num_seconds()) * NANOS_PER_SEC + i128::from(elapsed.subsec_nanos());
    let interval_nanos = interval.as_nanos() as i128;
    let intervals = elapsed_nanos / interval_nanos;
    let covered = intervals * interval_nanos;

    let secs = i64::try_from(covered.div_euclid(NANOS_PER_SEC)).unwrap_or(i64::MAX);
    let nanos = covered.rem_euclid(NANOS_PER_SEC) as u32;
    (intervals, TimeDelta::new(secs, nanos).unwrap_or(elapsed))
}

fn decode(fields: Option<&Fields>) -> Result<Option<BucketSnapshot>, SnapshotError> {
    match fields {
        Some(fields) => BucketSnapshot::from_fields(fields),
        None => Ok(None),
    }
}

fn time_until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    at.signed_duration_since(now).to_std().unwrap_or(Duration::ZERO)
}
