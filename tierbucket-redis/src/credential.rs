//! Access-token handling for token-authenticated Redis.
//!
//! Hosted Redis offerings may authenticate with short-lived tokens instead of a fixed
//! password. A [`TokenRefresher`] owns the current token, reports when it is about to expire,
//! and fetches a new one from a [`CredentialSource`] on request. Nothing here is global: each
//! [`RedisCache`](crate::RedisCache) holds its own refresher.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tierbucket::{CacheError, Clock, SystemClock};
use tokio::sync::RwLock;

/// Refresh this long before a token's expiry.
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_secs(30);

/// A password-equivalent secret with an expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self { secret: secret.into(), expires_at }
    }

    /// A token that never expires, e.g. a static password.
    pub fn non_expiring(secret: impl Into<String>) -> Self {
        Self::new(secret, DateTime::<Utc>::MAX_UTC)
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Where new tokens come from (an identity provider, a secrets manager, ...).
#[async_trait]
pub trait CredentialSource: Send + Sync + fmt::Debug {
    async fn fetch(&self) -> Result<AccessToken, CacheError>;
}

/// Source that always hands out the same token.
#[derive(Debug, Clone)]
pub struct StaticCredential {
    token: AccessToken,
}

impl StaticCredential {
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }

    /// Fixed password that never expires.
    pub fn password(secret: impl Into<String>) -> Self {
        Self::new(AccessToken::non_expiring(secret))
    }
}

#[async_trait]
impl CredentialSource for StaticCredential {
    async fn fetch(&self) -> Result<AccessToken, CacheError> {
        Ok(self.token.clone())
    }
}

/// Reads the secret from a file, re-reading it every `reread_every`.
///
/// Suits secrets mounted by an orchestrator that rotates the file in place. Surrounding
/// whitespace is trimmed.
#[derive(Debug, Clone)]
pub struct FileCredential {
    path: PathBuf,
    reread_every: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl FileCredential {
    pub fn new(path: impl Into<PathBuf>, reread_every: Duration) -> Self {
        Self {
            path: path.into(),
            reread_every: window_delta(reread_every),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialSource for FileCredential {
    async fn fetch(&self) -> Result<AccessToken, CacheError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CacheError::Credential(format!("reading {}: {e}", self.path.display()))
        })?;
        let secret = raw.trim();
        if secret.is_empty() {
            return Err(CacheError::Credential(format!("{} is empty", self.path.display())));
        }
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.reread_every)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Ok(AccessToken::new(secret, expires_at))
    }
}

/// Holds the current token and refreshes it shortly before expiry.
#[derive(Debug, Clone)]
pub struct TokenRefresher {
    source: Arc<dyn CredentialSource>,
    current: Arc<RwLock<Option<AccessToken>>>,
    window: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl TokenRefresher {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            current: Arc::new(RwLock::new(None)),
            window: window_delta(DEFAULT_REFRESH_WINDOW),
            clock: Arc::new(SystemClock),
        }
    }

    /// How long before expiry a token counts as expiring.
    pub fn with_refresh_window(mut self, window: Duration) -> Self {
        self.window = window_delta(window);
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// True when there is no token yet or it expires within the refresh window of `now`.
    pub async fn is_expiring(&self, now: DateTime<Utc>) -> bool {
        self.needs_refresh(self.current.read().await.as_ref(), now)
    }

    fn needs_refresh(&self, token: Option<&AccessToken>, now: DateTime<Utc>) -> bool {
        match token {
            None => true,
            Some(token) => token.expires_at.signed_duration_since(now) <= self.window,
        }
    }

    /// Fetch a new token from the source and make it current.
    pub async fn refresh(&self) -> Result<AccessToken, CacheError> {
        let mut current = self.current.write().await;
        self.fetch_into(&mut current).await
    }

    async fn fetch_into(&self, current: &mut Option<AccessToken>) -> Result<AccessToken, CacheError> {
        let token = self.source.fetch().await?;
        tracing::debug!(expires_at = %token.expires_at, "redis access token refreshed");
        *current = Some(token.clone());
        Ok(token)
    }

    /// The current token, refreshed first when [`is_expiring`](Self::is_expiring) says so.
    ///
    /// Concurrent callers share one fetch: the first takes the write lock and the rest see
    /// the new token once it is released.
    pub async fn token(&self) -> Result<AccessToken, CacheError> {
        let now = self.clock.now();
        {
            let current = self.current.read().await;
            if !self.needs_refresh(current.as_ref(), now) {
                if let Some(token) = current.as_ref() {
                    return Ok(token.clone());
                }
            }
        }

        let mut current = self.current.write().await;
        if !self.needs_refresh(current.as_ref(), now) {
            if let Some(token) = current.as_ref() {
                return Ok(token.clone());
            }
        }
        self.fetch_into(&mut current).await
    }
}

fn window_delta(window: Duration) -> TimeDelta {
    TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tierbucket::ManualClock;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    /// Issues `token-N` valid for five minutes from the shared clock.
    #[derive(Debug)]
    struct RotatingSource {
        clock: ManualClock,
        issued: AtomicU32,
    }

    #[async_trait]
    impl CredentialSource for RotatingSource {
        async fn fetch(&self) -> Result<AccessToken, CacheError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken::new(format!("token-{n}"), self.clock.now() + TimeDelta::minutes(5)))
        }
    }

    #[derive(Debug)]
    struct BrokenSource;

    #[async_trait]
    impl CredentialSource for BrokenSource {
        async fn fetch(&self) -> Result<AccessToken, CacheError> {
            Err(CacheError::Credential("identity provider unavailable".into()))
        }
    }

    #[tokio::test]
    async fn refreshes_only_inside_window() {
        let clock = ManualClock::new(start());
        let source = Arc::new(RotatingSource { clock: clock.clone(), issued: AtomicU32::new(0) });
        let refresher = TokenRefresher::new(source.clone()).with_clock(clock.clone());

        assert!(refresher.is_expiring(clock.now()).await);
        assert_eq!(refresher.token().await.unwrap().secret(), "token-1");

        clock.advance(Duration::from_secs(4 * 60));
        assert_eq!(refresher.token().await.unwrap().secret(), "token-1");
        assert_eq!(source.issued.load(Ordering::SeqCst), 1);

        // 30s before expiry counts as expiring.
        clock.advance(Duration::from_secs(30));
        assert!(refresher.is_expiring(clock.now()).await);
        assert_eq!(refresher.token().await.unwrap().secret(), "token-2");
        assert_eq!(source.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let clock = ManualClock::new(start());
        let source = Arc::new(RotatingSource { clock: clock.clone(), issued: AtomicU32::new(0) });
        let refresher = TokenRefresher::new(source.clone()).with_clock(clock.clone());

        let (a, b, c) = tokio::join!(refresher.token(), refresher.token(), refresher.token());
        for token in [a, b, c] {
            assert_eq!(token.unwrap().secret(), "token-1");
        }
        assert_eq!(source.issued.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn static_password_never_expires() {
        let refresher = TokenRefresher::new(Arc::new(StaticCredential::password("hunter2")));
        refresher.refresh().await.unwrap();
        assert!(!refresher.is_expiring(Utc::now()).await);
        assert_eq!(refresher.token().await.unwrap().secret(), "hunter2");
    }

    #[tokio::test]
    async fn source_failure_surfaces_as_credential_error() {
        let refresher = TokenRefresher::new(Arc::new(BrokenSource));
        let err = refresher.token().await.unwrap_err();
        assert!(matches!(err, CacheError::Credential(_)));
    }

    #[tokio::test]
    async fn file_credential_rereads_rotated_secret() {
        let clock = ManualClock::new(start());
        let path = std::env::temp_dir()
            .join(format!("tierbucket-credential-{}", std::process::id()));
        std::fs::write(&path, "first\n").unwrap();

        let source = FileCredential::new(&path, Duration::from_secs(60)).with_clock(clock.clone());
        let refresher = TokenRefresher::new(Arc::new(source))
            .with_refresh_window(Duration::from_secs(5))
            .with_clock(clock.clone());
        assert_eq!(refresher.token().await.unwrap().secret(), "first");

        std::fs::write(&path, "second").unwrap();
        clock.advance(Duration::from_secs(30));
        assert_eq!(refresher.token().await.unwrap().secret(), "first");

        clock.advance(Duration::from_secs(30));
        assert_eq!(refresher.token().await.unwrap().secret(), "second");

        std::fs::write(&path, "  ").unwrap();
        let err = refresher.refresh().await.unwrap_err();
        assert!(matches!(err, CacheError::Credential(_)));
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_a_credential_error() {
        let source = FileCredential::new("/nonexistent/tierbucket/secret", Duration::from_secs(60));
        assert!(matches!(source.fetch().await.unwrap_err(), CacheError::Credential(_)));
    }

    #[test]
    fn debug_redacts_secret() {
        let token = AccessToken::non_expiring("s3cret");
        assert!(!format!("{token:?}").contains("s3cret"));
    }
}
