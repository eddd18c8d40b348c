//! HTTP front end for the `tierbucket` rate limiter.
//!
//! `POST /requests` takes a token for the caller named in the JSON body; `GET
//! /buckets/{key}/stats` reports what is left without taking one.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tierbucket::{BucketConfig, ExpiringLocalCache, LogSink, RateLimiter, TieredRateLimiter};
use tierbucket_redis::{FileCredential, RedisCache, RedisSettings, TokenRefresher};

pub mod config;
pub mod handlers;

pub use config::{ConfigError, ServerConfig};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<dyn RateLimiter>,
    pub bucket: BucketConfig,
    pub key_field: Arc<str>,
}

impl AppState {
    pub fn new(limiter: Arc<dyn RateLimiter>, bucket: BucketConfig, key_field: &str) -> Self {
        Self { limiter, bucket, key_field: Arc::from(key_field) }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/requests", post(handlers::submit_request))
        .route("/buckets/{key}/stats", get(handlers::bucket_stats))
        .with_state(state)
}

/// Build the limiter described by `config`.
///
/// A configured but unreachable Redis does not stop the server. It stays the primary tier:
/// decisions fall back to the local tier with the connection error as advisory, and each one
/// retries the connection until Redis answers again.
pub async fn build_limiter(config: &ServerConfig) -> Arc<dyn RateLimiter> {
    let local = Arc::new(
        ExpiringLocalCache::new().with_max_entries(config.local_cache_max_entries),
    );

    let limiter = match &config.redis_url {
        Some(url) => {
            let redis = redis_cache(config, url);
            match redis.ensure_connected().await {
                Ok(()) => tracing::info!("using redis as the shared tier"),
                Err(e) => tracing::warn!(
                    error = %e,
                    "redis unavailable at startup, serving from the local tier until it answers"
                ),
            }
            TieredRateLimiter::new(Arc::new(redis), local)
        }
        None => {
            tracing::info!("no REDIS_URL configured, running on the local tier only");
            TieredRateLimiter::local_only(local)
        }
    };

    Arc::new(
        limiter
            .with_failure_policy(config.failure_policy)
            .with_standby_mode(config.standby_mode)
            .with_sink(LogSink),
    )
}

fn redis_cache(config: &ServerConfig, url: &str) -> RedisCache {
    let mut settings = RedisSettings::new(url)
        .with_connect_timeout(config.redis_connect_timeout)
        .with_response_timeout(config.redis_response_timeout);
    if let Some(username) = &config.redis_username {
        settings = settings.with_username(username.clone());
    }
    if let Some(password) = &config.redis_password {
        settings = settings.with_password(password.clone());
    }
    if let Some(prefix) = &config.redis_key_prefix {
        settings = settings.with_key_prefix(prefix.clone());
    }

    match &config.redis_password_file {
        Some(path) => {
            let source = FileCredential::new(path.clone(), config.redis_password_reread);
            RedisCache::lazy_with_credentials(settings, TokenRefresher::new(Arc::new(source)))
        }
        None => RedisCache::lazy(settings),
    }
}
