use crate::credential::TokenRefresher;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{ConnectionInfo, IntoConnectionInfo, RedisError};
use std::collections::HashMap;
use std::time::Duration;
use tierbucket::{CacheClient, CacheError, Fields};
use tokio::sync::RwLock;

/// Default bound on one connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
/// Default bound on one command round trip.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);
/// Default number of extra connection attempts.
pub const DEFAULT_CONNECT_RETRIES: usize = 1;

/// Connection settings for [`RedisCache`].
#[derive(Clone)]
pub struct RedisSettings {
    url: String,
    username: Option<String>,
    password: Option<String>,
    key_prefix: Option<String>,
    connect_timeout: Duration,
    response_timeout: Duration,
    connect_retries: usize,
}

impl std::fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSettings")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_prefix", &self.key_prefix)
            .field("connect_timeout", &self.connect_timeout)
            .field("response_timeout", &self.response_timeout)
            .field("connect_retries", &self.connect_retries)
            .finish()
    }
}

impl RedisSettings {
    /// Settings for `url` (`redis://` or `rediss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            key_prefix: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            connect_retries: DEFAULT_CONNECT_RETRIES,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Fixed password; ignored when a [`TokenRefresher`] supplies credentials.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Namespace every key as `prefix:key`. Blank prefixes are ignored.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim().trim_end_matches(':').to_string();
        self.key_prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Bound on each TCP connect and handshake.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound on each command round trip. A slow shared tier must not hold up the decision.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Extra connection attempts before a connect is reported as unreachable.
    pub fn with_connect_retries(mut self, retries: usize) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Upper bound on a whole connect: every attempt, its handshake, and the `PING`.
    fn connect_budget(&self) -> Duration {
        let attempts = u32::try_from(self.connect_retries.saturating_add(1)).unwrap_or(u32::MAX);
        self.connect_timeout
            .saturating_add(self.response_timeout)
            .saturating_mul(attempts)
            .saturating_add(self.response_timeout)
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_connection_timeout(self.connect_timeout)
            .set_response_timeout(self.response_timeout)
            .set_number_of_retries(self.connect_retries)
    }

    fn connection_info(&self, password: Option<&str>) -> Result<ConnectionInfo, CacheError> {
        let mut info = self.url.as_str().into_connection_info().map_err(CacheError::backend)?;
        if let Some(username) = &self.username {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = password.or(self.password.as_deref()) {
            info.redis.password = Some(password.to_string());
        }
        Ok(info)
    }
}

/// A live connection and the token secret it authenticated with.
struct Link {
    manager: ConnectionManager,
    secret: Option<String>,
}

/// Shared cache tier backed by Redis hashes.
///
/// Each snapshot field becomes a hash field; the write and its expiry go out in one atomic
/// pipeline, so a snapshot never lingers without a TTL.
///
/// The connection is opened on first use and reopened whenever the credential changes. While
/// the server is unreachable every call fails fast with [`CacheError::Unreachable`], and the
/// next call tries again.
pub struct RedisCache {
    settings: RedisSettings,
    credentials: Option<TokenRefresher>,
    link: RwLock<Option<Link>>,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("settings", &self.settings)
            .field("credentials", &self.credentials.is_some())
            .field("connection", &"<redis::aio::ConnectionManager>")
            .finish()
    }
}

impl RedisCache {
    /// Cache that connects on first use; performs no I/O.
    pub fn lazy(settings: RedisSettings) -> Self {
        Self { settings, credentials: None, link: RwLock::new(None) }
    }

    /// Like [`lazy`](Self::lazy), authenticating with tokens from `credentials`.
    pub fn lazy_with_credentials(settings: RedisSettings, credentials: TokenRefresher) -> Self {
        Self { settings, credentials: Some(credentials), link: RwLock::new(None) }
    }

    /// Connect now with the password (if any) from `settings`.
    ///
    /// # Errors
    /// Returns `CacheError::Unreachable` if the server cannot be reached or does not answer
    /// `PING` within the configured timeouts.
    pub async fn connect(settings: RedisSettings) -> Result<Self, CacheError> {
        let cache = Self::lazy(settings);
        cache.ensure_connected().await?;
        Ok(cache)
    }

    /// Connect now using tokens from `credentials`, reconnecting whenever the token changes.
    pub async fn connect_with_credentials(
        settings: RedisSettings,
        credentials: TokenRefresher,
    ) -> Result<Self, CacheError> {
        let cache = Self::lazy_with_credentials(settings, credentials);
        cache.ensure_connected().await?;
        Ok(cache)
    }

    /// Open the connection now if it is not open yet (or the credential changed).
    pub async fn ensure_connected(&self) -> Result<(), CacheError> {
        self.connection().await.map(|_| ())
    }

    /// True once a connection has been established.
    pub async fn is_connected(&self) -> bool {
        self.link.read().await.is_some()
    }

    fn key(&self, key: &str) -> String {
        match &self.settings.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }

    /// A connection authenticated with the current credential.
    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let secret = match &self.credentials {
            Some(credentials) => Some(credentials.token().await?.secret().to_string()),
            None => None,
        };

        if let Some(link) = self.link.read().await.as_ref() {
            if link.secret == secret {
                return Ok(link.manager.clone());
            }
        }

        let mut link = self.link.write().await;
        // Another caller may have reconnected while we waited for the lock.
        if let Some(current) = link.as_ref() {
            if current.secret == secret {
                return Ok(current.manager.clone());
            }
        }
        let manager = open(&self.settings, secret.as_deref()).await?;
        if link.is_some() {
            tracing::info!(target: "tierbucket::redis", "reconnected with refreshed credentials");
        }
        *link = Some(Link { manager: manager.clone(), secret });
        Ok(manager)
    }
}

async fn open(settings: &RedisSettings, password: Option<&str>) -> Result<ConnectionManager, CacheError> {
    let client = redis::Client::open(settings.connection_info(password)?).map_err(map_err)?;
    let connect = async {
        let mut connection = ConnectionManager::new_with_config(client, settings.manager_config())
            .await
            .map_err(map_err)?;
        redis::cmd("PING").query_async::<String>(&mut connection).await.map_err(map_err)?;
        Ok::<_, CacheError>(connection)
    };

    let budget = settings.connect_budget();
    let result = match tokio::time::timeout(budget, connect).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::Unreachable(format!("no answer within {budget:?}"))),
    };
    match &result {
        Ok(_) => tracing::debug!(target: "tierbucket::redis", url = %settings.url, "connected to redis"),
        Err(e) => tracing::warn!(target: "tierbucket::redis", url = %settings.url, error = %e, "failed to connect to redis"),
    }
    result
}

fn map_err(err: RedisError) -> CacheError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        CacheError::Unreachable(err.to_string())
    } else {
        CacheError::backend(err)
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Fields>, CacheError> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok((!fields.is_empty()).then_some(fields))
    }

    async fn update(&self, key: &str, fields: Fields, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        let items: Vec<(String, String)> = fields.into_iter().collect();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);

        redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &items[..])
            .ignore()
            .pexpire(&key, ttl_ms)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefix_is_normalised() {
        let settings = RedisSettings::new("redis://localhost").with_key_prefix(" buckets: ");
        assert_eq!(settings.key_prefix.as_deref(), Some("buckets"));

        let blank = RedisSettings::new("redis://localhost").with_key_prefix("  ");
        assert_eq!(blank.key_prefix, None);
    }

    #[test]
    fn token_overrides_static_password() {
        let settings = RedisSettings::new("redis://localhost:6379")
            .with_username("svc")
            .with_password("static");

        let info = settings.connection_info(None).unwrap();
        assert_eq!(info.redis.username.as_deref(), Some("svc"));
        assert_eq!(info.redis.password.as_deref(), Some("static"));

        let info = settings.connection_info(Some("token")).unwrap();
        assert_eq!(info.redis.password.as_deref(), Some("token"));
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = RedisSettings::new("not a url").connection_info(None).unwrap_err();
        assert!(matches!(err, CacheError::Backend(_)));
    }

    #[test]
    fn connect_budget_covers_every_attempt() {
        let settings = RedisSettings::new("redis://localhost")
            .with_connect_timeout(Duration::from_millis(200))
            .with_response_timeout(Duration::from_millis(100))
            .with_connect_retries(2);
        assert_eq!(settings.connect_budget(), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn lazy_cache_does_no_io() {
        let cache = RedisCache::lazy(RedisSettings::new("redis://127.0.0.1:1"));
        assert!(!cache.is_connected().await);
    }

    #[test]
    fn debug_redacts_password() {
        let settings = RedisSettings::new("redis://localhost").with_password("s3cret");
        assert!(!format!("{settings:?}").contains("s3cret"));
    }
}
