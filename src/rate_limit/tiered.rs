//! Two-tier orchestration of the token bucket.
//!
//! Every decision runs a full read → compute → write cycle against the primary (shared) tier
//! and, independently, against the secondary (local) tier. The primary answer wins whenever it
//! exists; the secondary keeps a warm copy of recent state so an outage of the shared cache
//! degrades to per-instance limiting instead of no limiting.
//!
//! The two cycles are not atomic and not coordinated with each other or with other
//! instances. Concurrent requests for the same key can lose updates and the tiers can drift
//! apart; occasional under-throttling is accepted in exchange for latency and availability.

use crate::cache::CacheClient;
use crate::clock::{Clock, SystemClock};
use crate::error::{LimiterError, Tier};
use crate::rate_limit::config::BucketConfig;
use crate::rate_limit::token_bucket::{TakeOutcome, TokenBucket};
use crate::rate_limit::{Decision, DecisionReport, RateLimiter};
use crate::telemetry::{deliver, LimiterEvent, NullSink, TelemetrySink};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// What to answer when neither tier can produce a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Admit the request.
    #[default]
    FailOpen,
    /// Deny the request, asking the caller to retry after one refill interval.
    FailClosed,
}

/// When the secondary tier is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StandbyMode {
    /// Run the secondary cycle on every decision so it always holds fresh state.
    #[default]
    Mirror,
    /// Only touch the secondary tier once the primary has failed.
    OnPrimaryFailure,
}

/// Rate limiter that reconstructs buckets from a primary and a secondary cache tier.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use tierbucket::{BucketConfig, ExpiringLocalCache, TieredRateLimiter};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let shared = Arc::new(ExpiringLocalCache::new()); // stand-in for a remote cache
/// let limiter = TieredRateLimiter::new(shared, Arc::new(ExpiringLocalCache::new()));
/// let config = BucketConfig::new(2, Duration::from_secs(60)).unwrap();
///
/// assert!(limiter.get_decision("caller", &config).await.is_allowed());
/// assert!(limiter.get_decision("caller", &config).await.is_allowed());
/// assert!(!limiter.get_decision("caller", &config).await.is_allowed());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TieredRateLimiter<S = NullSink> {
    primary: Option<Arc<dyn CacheClient>>,
    secondary: Arc<dyn CacheClient>,
    clock: Arc<dyn Clock>,
    failure_policy: FailurePolicy,
    standby: StandbyMode,
    sink: S,
}

impl TieredRateLimiter<NullSink> {
    /// Limiter over a shared primary tier and a local secondary tier.
    pub fn new(primary: Arc<dyn CacheClient>, secondary: Arc<dyn CacheClient>) -> Self {
        Self::build(Some(primary), secondary)
    }

    /// Limiter with no shared tier; every decision reports the missing primary as advisory.
    pub fn local_only(secondary: Arc<dyn CacheClient>) -> Self {
        Self::build(None, secondary)
    }

    fn build(primary: Option<Arc<dyn CacheClient>>, secondary: Arc<dyn CacheClient>) -> Self {
        Self {
            primary,
            secondary,
            clock: Arc::new(SystemClock),
            failure_policy: FailurePolicy::default(),
            standby: StandbyMode::default(),
            sink: NullSink,
        }
    }
}

impl<S> TieredRateLimiter<S> {
    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_standby_mode(mut self, standby: StandbyMode) -> Self {
        self.standby = standby;
        self
    }

    /// Attach a telemetry sink.
    pub fn with_sink<S2>(self, sink: S2) -> TieredRateLimiter<S2> {
        TieredRateLimiter {
            primary: self.primary,
            secondary: self.secondary,
            clock: self.clock,
            failure_policy: self.failure_policy,
            standby: self.standby,
            sink,
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn standby_mode(&self) -> StandbyMode {
        self.standby
    }
}

impl<S> TieredRateLimiter<S>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    /// Take one token for `key`.
    ///
    /// The primary tier's decision is authoritative. If the primary fails, the secondary's
    /// decision is returned with the primary error as advisory. Only when both fail does the
    /// [`FailurePolicy`] decide.
    pub async fn get_decision(&self, key: &str, config: &BucketConfig) -> DecisionReport {
        let bucket = TokenBucket::new(*config);
        let now = self.clock.now();
        let primary = self.primary.as_deref();
        let secondary = Some(self.secondary.as_ref());

        let (primary_result, secondary_result) = match self.standby {
            StandbyMode::Mirror => {
                let (p, s) = tokio::join!(
                    attempt(Tier::Primary, primary, key, &bucket, now),
                    attempt(Tier::Secondary, secondary, key, &bucket, now),
                );
                (p, Some(s))
            }
            StandbyMode::OnPrimaryFailure => {
                let p = attempt(Tier::Primary, primary, key, &bucket, now).await;
                let s = match p {
                    Ok(_) => None,
                    Err(_) => Some(attempt(Tier::Secondary, secondary, key, &bucket, now).await),
                };
                (p, s)
            }
        };

        match primary_result {
            Ok(decision) => {
                if let Some(Err(err)) = secondary_result {
                    self.secondary_failed(key, err).await;
                }
                self.emit_outcome(Tier::Primary, decision).await;
                DecisionReport { decision, served_by: Some(Tier::Primary), advisory: None }
            }
            Err(primary_err) => {
                if matches!(primary_err, LimiterError::TierNotConfigured(_)) {
                    tracing::debug!(key, "no primary tier configured, using local tier");
                } else {
                    tracing::warn!(key, error = %primary_err, "primary tier failed, using local tier");
                }
                self.emit(LimiterEvent::tier_failed(&primary_err)).await;

                match secondary_result {
                    Some(Ok(decision)) => {
                        self.emit_outcome(Tier::Secondary, decision).await;
                        DecisionReport {
                            decision,
                            served_by: Some(Tier::Secondary),
                            advisory: Some(primary_err),
                        }
                    }
                    Some(Err(secondary_err)) => {
                        self.secondary_failed(key, secondary_err).await;
                        self.resolve_failure(key, config, primary_err).await
                    }
                    None => self.resolve_failure(key, config, primary_err).await,
                }
            }
        }
    }

    /// Tokens currently available for `key`, without consuming or writing anything.
    ///
    /// Reads the primary tier and falls back to the secondary on a primary error. A key with
    /// no stored snapshot reports a full bucket. Only a corrupt snapshot is an error.
    pub async fn get_stats(&self, key: &str, config: &BucketConfig) -> Result<u32, LimiterError> {
        let bucket = TokenBucket::new(*config);
        let now = self.clock.now();

        let from_primary = match self.primary.as_deref() {
            Some(primary) => match primary.get(key).await {
                Ok(fields) => Some(fields),
                Err(err) => {
                    tracing::warn!(key, backend = primary.name(), error = %err, "stats read from primary tier failed");
                    None
                }
            },
            None => None,
        };

        let (tier, fields) = match from_primary {
            Some(fields) => (Tier::Primary, fields),
            None => {
                let fields = self.secondary.get(key).await.unwrap_or_else(|err| {
                    tracing::debug!(key, error = %err, "stats read from local tier failed");
                    None
                });
                (Tier::Secondary, fields)
            }
        };

        bucket
            .peek_fields(fields.as_ref(), now)
            .map(|state| state.tokens)
            .map_err(|source| LimiterError::MalformedSnapshot { tier, source })
    }

    async fn resolve_failure(
        &self,
        key: &str,
        config: &BucketConfig,
        cause: LimiterError,
    ) -> DecisionReport {
        let decision = match self.failure_policy {
            FailurePolicy::FailOpen => {
                tracing::warn!(key, error = %cause, "no tier usable, failing open");
                self.emit(LimiterEvent::FailedOpen).await;
                Decision::Allowed { remaining: None }
            }
            FailurePolicy::FailClosed => {
                let retry_after = config.refill_interval();
                tracing::warn!(key, error = %cause, "no tier usable, failing closed");
                self.emit(LimiterEvent::FailedClosed { retry_after }).await;
                Decision::Denied { retry_after }
            }
        };
        DecisionReport { decision, served_by: None, advisory: Some(cause) }
    }

    async fn secondary_failed(&self, key: &str, err: LimiterError) {
        tracing::debug!(key, error = %err, "local tier attempt failed");
        self.emit(LimiterEvent::tier_failed(&err)).await;
    }

    async fn emit_outcome(&self, tier: Tier, decision: Decision) {
        let event = match decision {
            Decision::Allowed { remaining } => {
                LimiterEvent::Admitted { tier, remaining: remaining.unwrap_or(0) }
            }
            Decision::Denied { retry_after } => LimiterEvent::Throttled { tier, retry_after },
        };
        self.emit(event).await;
    }

    async fn emit(&self, event: LimiterEvent) {
        deliver(&self.sink, event).await;
    }
}

/// One tier's read → compute → write cycle.
///
/// An exhausted bucket is a denial and is not written back.
async fn attempt(
    tier: Tier,
    client: Option<&dyn CacheClient>,
    key: &str,
    bucket: &TokenBucket,
    now: DateTime<Utc>,
) -> Result<Decision, LimiterError> {
    let client = client.ok_or(LimiterError::TierNotConfigured(tier))?;
    let fields =
        client.get(key).await.map_err(|source| LimiterError::Cache { tier, source })?;
    let outcome = bucket
        .take_token_from_fields(fields.as_ref(), now)
        .map_err(|source| LimiterError::MalformedSnapshot { tier, source })?;

    match outcome {
        TakeOutcome::Exhausted { retry_after } => Ok(Decision::Denied { retry_after }),
        TakeOutcome::Taken { snapshot, ttl } => {
            client
                .update(key, snapshot.to_fields(), ttl)
                .await
                .map_err(|source| LimiterError::Cache { tier, source })?;
            Ok(Decision::Allowed { remaining: Some(snapshot.tokens) })
        }
    }
}

#[async_trait::async_trait]
impl<S> RateLimiter for TieredRateLimiter<S>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    async fn decide(&self, key: &str, config: &BucketConfig) -> DecisionReport {
        self.get_decision(key, config).await
    }

    async fn stats(&self, key: &str, config: &BucketConfig) -> Result<u32, LimiterError> {
        self.get_stats(key, config).await
    }
}
