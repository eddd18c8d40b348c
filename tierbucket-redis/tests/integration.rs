use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tierbucket::{BucketConfig, CacheClient, Decision, ExpiringLocalCache, Fields, TieredRateLimiter};
use tierbucket_redis::{RedisCache, RedisSettings};

// Requires Redis running. If TIERBUCKET_TEST_REDIS_URL is unset, the tests skip.
fn redis_url() -> Option<String> {
    match std::env::var("TIERBUCKET_TEST_REDIS_URL") {
        Ok(v) => Some(v),
        Err(_) => {
            eprintln!("skipping: set TIERBUCKET_TEST_REDIS_URL (e.g. redis://127.0.0.1:6379)");
            None
        }
    }
}

fn unique_prefix() -> String {
    format!("tierbucket-test-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[tokio::test]
async fn stores_fields_with_ttl() {
    let Some(url) = redis_url() else { return };
    let cache = RedisCache::connect(RedisSettings::new(url).with_key_prefix(unique_prefix()))
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to redis: {e}"));

    assert_eq!(cache.get("missing").await.unwrap(), None);

    let mut fields = Fields::new();
    fields.insert("tokens".into(), "4".into());
    fields.insert("tokenLastIncreaseTime".into(), "2024-01-01T00:00:00.000Z".into());
    cache.update("k", fields.clone(), Duration::from_millis(300)).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some(fields));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(cache.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn limiter_shares_state_through_redis() {
    let Some(url) = redis_url() else { return };
    let settings = RedisSettings::new(url).with_key_prefix(unique_prefix());
    let config = BucketConfig::new(2, Duration::from_secs(60)).unwrap();

    // Two "instances" with their own local tier and a shared Redis.
    let a = TieredRateLimiter::new(
        Arc::new(RedisCache::connect(settings.clone()).await.unwrap()),
        Arc::new(ExpiringLocalCache::new()),
    );
    let b = TieredRateLimiter::new(
        Arc::new(RedisCache::connect(settings).await.unwrap()),
        Arc::new(ExpiringLocalCache::new()),
    );

    assert!(a.get_decision("caller", &config).await.is_allowed());
    assert!(b.get_decision("caller", &config).await.is_allowed());
    let report = a.get_decision("caller", &config).await;
    assert!(matches!(report.decision, Decision::Denied { .. }));
    assert_eq!(b.get_stats("caller", &config).await.unwrap(), 0);
}

#[tokio::test]
async fn unreachable_server_is_reported() {
    // Port 1 is reserved and refuses connections.
    let err = RedisCache::connect(RedisSettings::new("redis://127.0.0.1:1")).await.unwrap_err();
    assert!(err.is_unreachable(), "unexpected error: {err}");
}
