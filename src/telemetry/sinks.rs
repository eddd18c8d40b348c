use super::events::{FailureCause, LimiterEvent};
use crate::error::Tier;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::{Service, ServiceExt};

/// Anything that accepts [`LimiterEvent`]s as a cheaply cloned `tower::Service`.
pub trait TelemetrySink:
    Service<LimiterEvent, Response = ()> + Clone + Send + Sync + 'static
{
}

impl<T> TelemetrySink for T where
    T: Service<LimiterEvent, Response = ()> + Clone + Send + Sync + 'static
{
}

/// Hand `event` to `sink`. A sink that is not ready or fails loses the event.
pub(crate) async fn deliver<S>(sink: &S, event: LimiterEvent)
where
    S: TelemetrySink,
    S::Future: Send,
{
    let kind = event.kind();
    let ready_sink = sink.clone().ready_oneshot().await.ok();
    match ready_sink {
        Some(mut ready_sink) => {
            if ready_sink.call(event).await.is_err() {
                tracing::trace!(kind, "telemetry sink rejected event");
            }
        }
        None => tracing::trace!(kind, "telemetry sink unavailable, event dropped"),
    }
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl Service<LimiterEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: LimiterEvent) -> Self::Future {
        ready(Ok(()))
    }
}

/// Logs events through `tracing` under the `tierbucket::telemetry` target.
///
/// Routine outcomes log at trace or debug. Failures that mean the shared state or the limit
/// itself is not being enforced log at warn. A tier that is simply not configured is not a
/// failure and logs at trace.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl Service<LimiterEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimiterEvent) -> Self::Future {
        const TARGET: &str = "tierbucket::telemetry";
        let kind = event.kind();
        match &event {
            LimiterEvent::Admitted { tier, remaining } => {
                tracing::trace!(target: TARGET, kind, %tier, remaining, "request admitted")
            }
            LimiterEvent::Throttled { tier, retry_after } => {
                tracing::debug!(target: TARGET, kind, %tier, ?retry_after, "request throttled")
            }
            LimiterEvent::TierFailed { tier, cause: FailureCause::Unconfigured, .. } => {
                tracing::trace!(target: TARGET, kind, %tier, "tier not configured")
            }
            LimiterEvent::TierFailed { tier: Tier::Secondary, cause, reason } => {
                let tier = Tier::Secondary;
                tracing::debug!(target: TARGET, kind, %tier, ?cause, reason, "local tier failed")
            }
            LimiterEvent::TierFailed { tier, cause, reason } => {
                tracing::warn!(target: TARGET, kind, %tier, ?cause, reason, "shared tier failed")
            }
            LimiterEvent::FailedOpen => {
                tracing::warn!(target: TARGET, kind, "no tier usable, request admitted unchecked")
            }
            LimiterEvent::FailedClosed { retry_after } => {
                tracing::warn!(target: TARGET, kind, ?retry_after, "no tier usable, request rejected")
            }
        }
        ready(Ok(()))
    }
}

/// Keeps the most recent events in memory, for tests and debugging endpoints.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<LimiterEvent>>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Keep at most `capacity` events, dropping the oldest first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { events: Arc::new(Mutex::new(VecDeque::new())), capacity: capacity.max(1) }
    }

    /// Events in arrival order.
    pub fn events(&self) -> Vec<LimiterEvent> {
        self.events.lock().expect("memory sink poisoned").iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("memory sink poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<LimiterEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LimiterEvent) -> Self::Future {
        let mut events = self.events.lock().expect("memory sink poisoned");
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        ready(Ok(()))
    }
}
