use crate::cache::heap::ExpiryHeap;
use crate::cache::{CacheClient, Fields};
use crate::clock::{Clock, SystemClock};
use crate::error::CacheError;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default bound on live entries in an [`ExpiringLocalCache`].
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Fields,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    heap: ExpiryHeap<String>,
}

impl Inner {
    /// Drop every entry whose expiry is at or before `now`.
    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        while let Some((_, expires_at)) = self.heap.peek_min() {
            if expires_at > now {
                break;
            }
            self.evict_min();
            removed += 1;
        }
        removed
    }

    /// Remove the soonest-expiring entry from heap and table together.
    fn evict_min(&mut self) -> Option<String> {
        let (key, _) = self.heap.pop_min()?;
        self.entries.remove(&key);
        Some(key)
    }

    fn set(&mut self, key: &str, value: Fields, expires_at: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.value = value;
            entry.expires_at = expires_at;
            if let Some(index) = self.heap.position(&key.to_string()) {
                self.heap.fix_at(index, expires_at);
            }
            return;
        }
        self.entries.insert(key.to_string(), CacheEntry { value, expires_at });
        self.heap.push(key.to_string(), expires_at);
    }
}

/// In-process cache whose entries expire on their own.
///
/// There is no background timer: every [`get`](Self::get) and [`set`](Self::set) first sweeps
/// expired entries off the top of the expiry heap. When the cache is full, inserting a new
/// key evicts the entry closest to expiring. The table and heap share one mutex so
/// concurrent request handlers cannot observe them out of step.
#[derive(Debug, Clone)]
pub struct ExpiringLocalCache {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl Default for ExpiringLocalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpiringLocalCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            clock: Arc::new(SystemClock),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Bound the number of live entries; values below 1 are raised to 1.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Insert or overwrite `key`, expiring `ttl` from now.
    pub fn set(&self, key: &str, value: Fields, ttl: Duration) {
        let now = self.clock.now();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut inner = self.inner.lock().expect("local cache poisoned");
        inner.sweep(now);
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_entries {
            if let Some(evicted) = inner.evict_min() {
                tracing::debug!(key = %evicted, max_entries = self.max_entries, "local cache full, evicted entry");
            }
        }
        inner.set(key, value, expires_at);
    }

    /// Fetch `key`; expired and unknown keys are both misses.
    pub fn get(&self, key: &str) -> Option<Fields> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().expect("local cache poisoned");
        inner.sweep(now);
        inner.entries.get(key).filter(|entry| entry.expires_at > now).map(|entry| entry.value.clone())
    }

    /// Sweep expired entries now; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.inner.lock().expect("local cache poisoned").sweep(now)
    }

    /// Entries currently held, including any that expired since the last access.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("local cache poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        let inner = self.inner.lock().expect("local cache poisoned");
        assert_eq!(inner.entries.len(), inner.heap.len());
        for key in inner.entries.keys() {
            assert!(inner.heap.position(key).is_some(), "{key} missing from heap");
        }
        inner.heap.assert_invariants();
    }
}

#[async_trait]
impl CacheClient for ExpiringLocalCache {
    fn name(&self) -> &str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<Fields>, CacheError> {
        Ok(ExpiringLocalCache::get(self, key))
    }

    async fn update(&self, key: &str, fields: Fields, ttl: Duration) -> Result<(), CacheError> {
        self.set(key, fields, ttl);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    fn value(v: &str) -> Fields {
        let mut f = Fields::new();
        f.insert("v".into(), v.into());
        f
    }

    #[test]
    fn returns_stored_value_before_expiry() {
        let cache = ExpiringLocalCache::new().with_clock(clock());
        cache.set("k", value("1"), Duration::from_secs(10));
        assert_eq!(cache.get("k"), Some(value("1")));
        assert_eq!(cache.get("other"), None);
    }

    #[test]
    fn expired_entry_is_a_miss_and_is_reclaimed_on_next_set() {
        let clock = clock();
        let cache = ExpiringLocalCache::new().with_clock(clock.clone());
        cache.set("k", value("1"), Duration::from_secs(1));
        cache.set("long", value("2"), Duration::from_secs(60));

        clock.advance(Duration::from_millis(1_500));
        assert_eq!(cache.len(), 2);

        // Writing an unrelated key sweeps `k` out of table and heap together.
        cache.set("other", value("3"), Duration::from_secs(60));
        assert_eq!(cache.len(), 2);
        cache.assert_invariants();
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.get("long"), Some(value("2")));
    }

    #[test]
    fn overwrite_updates_value_and_expiry() {
        let clock = clock();
        let cache = ExpiringLocalCache::new().with_clock(clock.clone());
        cache.set("a", value("1"), Duration::from_secs(5));
        cache.set("b", value("2"), Duration::from_secs(10));
        cache.set("a", value("3"), Duration::from_secs(20));
        cache.assert_invariants();

        clock.advance(Duration::from_secs(15));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(value("3")));
        cache.assert_invariants();
    }

    #[test]
    fn full_cache_evicts_soonest_expiring() {
        let cache = ExpiringLocalCache::new().with_clock(clock()).with_max_entries(2);
        cache.set("short", value("1"), Duration::from_secs(5));
        cache.set("long", value("2"), Duration::from_secs(50));
        cache.set("new", value("3"), Duration::from_secs(20));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.get("long"), Some(value("2")));
        assert_eq!(cache.get("new"), Some(value("3")));
        cache.assert_invariants();
    }

    #[test]
    fn overwrite_on_full_cache_does_not_evict() {
        let cache = ExpiringLocalCache::new().with_clock(clock()).with_max_entries(2);
        cache.set("a", value("1"), Duration::from_secs(5));
        cache.set("b", value("2"), Duration::from_secs(50));
        cache.set("a", value("3"), Duration::from_secs(5));
        assert_eq!(cache.get("a"), Some(value("3")));
        assert_eq!(cache.get("b"), Some(value("2")));
    }

    #[test]
    fn purge_expired_reports_removed_count() {
        let clock = clock();
        let cache = ExpiringLocalCache::new().with_clock(clock.clone());
        for i in 0..5 {
            cache.set(&format!("k{i}"), value("x"), Duration::from_secs(i + 1));
        }
        clock.advance(Duration::from_secs(3));
        assert_eq!(cache.purge_expired(), 3);
        assert_eq!(cache.len(), 2);
        cache.assert_invariants();
    }

    #[tokio::test]
    async fn concurrent_writers_keep_table_and_heap_paired() {
        let cache = ExpiringLocalCache::new().with_max_entries(64);
        let mut handles = Vec::new();
        for worker in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..200u64 {
                    let key = format!("k{}", (worker * 7 + i) % 100);
                    CacheClient::update(&cache, &key, value("x"), Duration::from_millis(i * 10 + 1))
                        .await
                        .unwrap();
                    let _ = CacheClient::get(&cache, &key).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(cache.len() <= 64);
        cache.assert_invariants();
    }
}
