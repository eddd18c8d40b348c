use crate::rate_limit::{BucketConfig, Decision, RateLimiter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

/// Error returned by [`RateLimitService`].
#[derive(thiserror::Error, Debug)]
pub enum RateLimitError<E> {
    /// The caller's bucket is empty.
    #[error("rate limited, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },
    /// The wrapped service failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> RateLimitError<E> {
    pub fn is_throttled(&self) -> bool {
        matches!(self, RateLimitError::Throttled { .. })
    }
}

/// A layer that enforces per-key rate limits using a [`RateLimiter`].
///
/// `key_fn` maps each request to the bucket it draws from.
pub struct RateLimitLayer<L, K> {
    limiter: Arc<L>,
    config: BucketConfig,
    key_fn: K,
}

impl<L, K: Clone> Clone for RateLimitLayer<L, K> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), config: self.config, key_fn: self.key_fn.clone() }
    }
}

impl<L, K> std::fmt::Debug for RateLimitLayer<L, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitLayer").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<L, K> RateLimitLayer<L, K> {
    /// Create a new rate limit layer.
    pub fn new(limiter: Arc<L>, config: BucketConfig, key_fn: K) -> Self {
        Self { limiter, config, key_fn }
    }
}

impl<S, L, K> Layer<S> for RateLimitLayer<L, K>
where
    L: RateLimiter + 'static,
    K: Clone,
{
    type Service = RateLimitService<S, L, K>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            config: self.config,
            key_fn: self.key_fn.clone(),
        }
    }
}

/// Middleware service that enforces rate limits.
///
/// Limiter faults never reject a request on their own: the limiter's failure policy has
/// already turned them into a decision, and the advisory is only logged.
pub struct RateLimitService<S, L, K> {
    inner: S,
    limiter: Arc<L>,
    config: BucketConfig,
    key_fn: K,
}

impl<S: Clone, L, K: Clone> Clone for RateLimitService<S, L, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            config: self.config,
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<S, L, K, Req> Service<Req> for RateLimitService<S, L, K>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    L: RateLimiter + 'static,
    K: Fn(&Req) -> String,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = RateLimitError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(RateLimitError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let key = (self.key_fn)(&req);
        let limiter = self.limiter.clone();
        let config = self.config;
        // Drive the clone that was not polled ready; the ready one stays in `self`.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let report = limiter.decide(&key, &config).await;
            if let Some(advisory) = &report.advisory {
                tracing::debug!(key = %key, error = %advisory, "rate limiter advisory");
            }
            match report.decision {
                Decision::Allowed { .. } => inner.call(req).await.map_err(RateLimitError::Inner),
                Decision::Denied { retry_after } => Err(RateLimitError::Throttled { retry_after }),
            }
        })
    }
}
