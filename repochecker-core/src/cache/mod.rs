//! Memoization cache for expensive, idempotent build service lookups.
//!
//! The cache survives across runs through a pluggable `CacheStore`; entries
//! carry the time they were computed and go stale after `CachePolicy::timeout`.
//! Storage is bounded: after every insertion that brings occupancy to
//! `slots` or more, the `nclean + (occupancy - slots)` oldest entries are
//! evicted.
//!
//! Errors from the wrapped lookup are returned to the caller and never
//! stored. Storage failures are logged and the lookup runs uncached.

mod memory;
mod sqlite;

pub use memory::InMemoryCacheStore;
pub use sqlite::SqliteCacheStore;

use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::CacheError;

/// Source of the current time, injectable so tests can age entries.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("mutex poisoned");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("mutex poisoned")
    }
}

/// Capacity and freshness limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub slots: usize,
    pub nclean: usize,
    pub timeout: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            slots: 4096,
            nclean: 1024,
            timeout: Duration::hours(2),
        }
    }
}

impl CachePolicy {
    /// How many entries to evict at the given occupancy.
    pub fn eviction_count(&self, occupancy: usize) -> usize {
        if occupancy >= self.slots {
            self.nclean + (occupancy - self.slots)
        } else {
            0
        }
    }
}

/// A stored result and when it was computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub stored_at: DateTime<Utc>,
    /// JSON encoding of the cached value.
    pub value: String,
}

/// Storage backend for memoized values.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Insert or replace.
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError>;

    async fn len(&self) -> Result<usize, CacheError>;

    /// Remove the `count` entries with the oldest `stored_at`. Returns how
    /// many were removed.
    async fn evict_oldest(&self, count: usize) -> Result<usize, CacheError>;
}

/// Get-or-compute wrapper around a `CacheStore`.
pub struct MemoCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
}

impl MemoCache {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, policy: CachePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// In-memory cache with the default policy and the system clock.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(SystemClock),
            CachePolicy::default(),
        )
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Canonical key for a lookup: the function name plus the JSON encoding
    /// of its arguments.
    pub fn key_for<A: Serialize + ?Sized>(name: &str, args: &A) -> Result<String, CacheError> {
        let encoded = serde_json::to_string(args)
            .map_err(|e| CacheError::Corruption(format!("unencodable key for {}: {}", name, e)))?;
        Ok(format!("{}:{}", name, encoded))
    }

    /// Return the live cached value for `name(args)` or compute, store and
    /// return it.
    pub async fn get_or_compute<A, T, E, F, Fut>(
        &self,
        name: &str,
        args: &A,
        compute: F,
    ) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = match Self::key_for(name, args) {
            Ok(key) => key,
            Err(e) => {
                warn!("Bypassing cache: {}", e);
                return compute().await;
            }
        };

        let now = self.clock.now();
        if let Some(value) = self.lookup_live(&key, now).await {
            return Ok(value);
        }

        let value = compute().await?;
        self.insert(&key, now, &value).await;
        Ok(value)
    }

    async fn lookup_live<T: DeserializeOwned>(&self, key: &str, now: DateTime<Utc>) -> Option<T> {
        let entry = match self.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                return None;
            }
        };

        if now - entry.stored_at >= self.policy.timeout {
            debug!("Cache entry for {} is stale", key);
            return None;
        }

        match serde_json::from_str(&entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding undecodable cache entry for {}: {}", key, e);
                None
            }
        }
    }

    async fn insert<T: Serialize>(&self, key: &str, now: DateTime<Utc>, value: &T) {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Not caching {}: {}", key, e);
                return;
            }
        };

        let entry = CacheEntry {
            stored_at: now,
            value: encoded,
        };
        if let Err(e) = self.store.put(key, entry).await {
            warn!("Cache write failed for {}: {}", key, e);
            return;
        }

        if let Err(e) = self.enforce_capacity().await {
            warn!("Cache eviction failed: {}", e);
        }
    }

    async fn enforce_capacity(&self) -> Result<(), CacheError> {
        let occupancy = self.store.len().await?;
        let count = self.policy.eviction_count(occupancy);
        if count > 0 {
            let removed = self.store.evict_oldest(count).await?;
            debug!("Evicted {} of {} cache entries", removed, occupancy);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;
    use proptest::prelude::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn cache_with(
        policy: CachePolicy,
    ) -> (MemoCache, Arc<InMemoryCacheStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryCacheStore::new());
        let clock = Arc::new(ManualClock::new(start()));
        let cache = MemoCache::new(store.clone(), clock.clone(), policy);
        (cache, store, clock)
    }

    async fn identity(cache: &MemoCache, calls: &AtomicUsize, n: u64) -> u64 {
        cache
            .get_or_compute("identity", &(n,), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(n)
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_eviction_count() {
        let policy = CachePolicy::default();
        assert_eq!(policy.eviction_count(4095), 0);
        assert_eq!(policy.eviction_count(4096), 1024);
        assert_eq!(policy.eviction_count(4100), 1028);
    }

    #[test]
    fn test_key_is_name_plus_json_args() {
        let key = MemoCache::key_for("last_build_success", &("a", "b", 3)).unwrap();
        assert_eq!(key, "last_build_success:[\"a\",\"b\",3]");
    }

    #[tokio::test]
    async fn test_hit_does_not_recompute() {
        let (cache, _store, _clock) = cache_with(CachePolicy::default());
        let calls = AtomicUsize::new(0);

        assert_eq!(identity(&cache, &calls, 7).await, 7);
        assert_eq!(identity(&cache, &calls, 7).await, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let (cache, store, _clock) = cache_with(CachePolicy::default());
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result: Result<u64, String> = cache
                .get_or_compute("flaky", &("x",), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("boom".to_string())
                })
                .await;
            assert_eq!(result, Err("boom".to_string()));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_entry_is_recomputed() {
        let (cache, store, clock) = cache_with(CachePolicy::default());
        let calls = AtomicUsize::new(0);

        identity(&cache, &calls, 0).await;
        clock.advance(Duration::hours(2));
        identity(&cache, &calls, 0).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The recomputation refreshes the timestamp.
        let key = MemoCache::key_for("identity", &(0u64,)).unwrap();
        let entry = store.get(&key).await.unwrap().unwrap();
        assert_eq!(entry.stored_at, start() + Duration::hours(2));
    }

    #[tokio::test]
    async fn test_entry_just_under_timeout_is_live() {
        let (cache, _store, clock) = cache_with(CachePolicy::default());
        let calls = AtomicUsize::new(0);

        identity(&cache, &calls, 0).await;
        clock.advance(Duration::hours(2) - Duration::seconds(1));
        identity(&cache, &calls, 0).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reaching_slots_evicts_nclean_oldest() {
        let (cache, store, clock) = cache_with(CachePolicy::default());
        let calls = AtomicUsize::new(0);

        for i in 0..4095 {
            identity(&cache, &calls, i).await;
            clock.advance(Duration::milliseconds(1));
        }
        assert_eq!(store.len().await.unwrap(), 4095);

        // A hit inserts nothing.
        identity(&cache, &calls, 0).await;
        assert_eq!(store.len().await.unwrap(), 4095);

        identity(&cache, &calls, 4095).await;
        assert_eq!(store.len().await.unwrap(), 3072);

        // Key 0 was among the oldest, so it is recomputed.
        let before = calls.load(Ordering::SeqCst);
        identity(&cache, &calls, 0).await;
        assert_eq!(calls.load(Ordering::SeqCst), before + 1);
        assert_eq!(store.len().await.unwrap(), 3073);

        // The newest keys survived.
        let key = MemoCache::key_for("identity", &(4094u64,)).unwrap();
        assert!(store.get(&key).await.unwrap().is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_occupancy_never_reaches_slots(
            slots in 4usize..40,
            nclean in 1usize..4,
            inserts in 1usize..120,
        ) {
            let policy = CachePolicy { slots, nclean, timeout: Duration::hours(2) };
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (cache, store, clock) = cache_with(policy);
                let calls = AtomicUsize::new(0);
                for i in 0..inserts {
                    identity(&cache, &calls, i as u64).await;
                    clock.advance(Duration::seconds(1));
                    let len = store.len().await.unwrap();
                    prop_assert!(len < slots);
                    prop_assert!(len >= (i + 1).min(slots - nclean));
                }
                Ok(())
            })?;
        }
    }
}
