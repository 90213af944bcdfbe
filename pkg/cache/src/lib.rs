//! Time-bounded memoisation with background refresh.
//!
//! Each [`RefreshingCache`] is one keyspace with its own TTL. A read of a
//! fresh entry returns it; a read of a stale entry returns it and schedules
//! one background refresh; a miss blocks on a synchronous build. At most one
//! producer runs per key at any time (the build fence). A failed background
//! refresh keeps the previous value.
//!
//! Entries nobody read for two TTLs are evicted on the next write, and a
//! keyspace may be capped with [`RefreshingCache::with_max_entries`], in
//! which case the least recently read entry goes first.

use parking_lot::{Mutex, RwLock};
use pkg_constants::cache::MIN_CACHE_TTL_SECS;
use pkg_metrics::metrics;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How a value was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Younger than the TTL.
    Fresh,
    /// Older than the TTL; a background refresh was scheduled.
    Stale,
    /// Not cached; the caller waited for a synchronous build.
    Miss,
}

/// Lifecycle of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    /// First build in progress. Readers wait.
    Building,
    Ready,
    /// Background refresh in progress. Readers get the old value.
    Refreshing,
}

struct Entry<V> {
    value: V,
    last_success: Instant,
    last_read: Instant,
}

struct Inner<K, V> {
    keyspace: &'static str,
    ttl: Duration,
    max_entries: Option<usize>,
    entries: RwLock<HashMap<K, Entry<V>>>,
    fences: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
    refreshing: Mutex<HashSet<K>>,
}

#[derive(Clone)]
pub struct RefreshingCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> RefreshingCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a keyspace. TTLs below the minimum are raised to it.
    pub fn new(keyspace: &'static str, ttl: Duration) -> Self {
        let min = Duration::from_secs(MIN_CACHE_TTL_SECS);
        if ttl < min {
            warn!(
                keyspace,
                ttl_secs = ttl.as_secs(),
                "cache ttl below minimum, using {}s",
                MIN_CACHE_TTL_SECS
            );
        }
        Self {
            inner: Arc::new(Inner {
                keyspace,
                ttl: ttl.max(min),
                max_entries: None,
                entries: RwLock::new(HashMap::new()),
                fences: Mutex::new(HashMap::new()),
                refreshing: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Cap the number of entries. Only valid before the cache is shared.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.max_entries = Some(max.max(1));
        }
        self
    }

    pub fn keyspace(&self) -> &'static str {
        self.inner.keyspace
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look at the cached value without scheduling anything.
    pub fn peek(&self, key: &K) -> Option<(V, Freshness)> {
        let entries = self.inner.entries.read();
        entries.get(key).map(|entry| {
            let freshness = if entry.last_success.elapsed() < self.inner.ttl {
                Freshness::Fresh
            } else {
                Freshness::Stale
            };
            (entry.value.clone(), freshness)
        })
    }

    pub fn state(&self, key: &K) -> CacheState {
        if self.inner.refreshing.lock().contains(key) {
            return CacheState::Refreshing;
        }
        if self.inner.entries.read().contains_key(key) {
            return CacheState::Ready;
        }
        let building = self
            .inner
            .fences
            .lock()
            .get(key)
            .is_some_and(|fence| fence.try_lock().is_err());
        if building {
            CacheState::Building
        } else {
            CacheState::Empty
        }
    }

    /// Serve `key`, using `producer` to build it on a miss or to refresh it
    /// in the background when stale. Only a failed synchronous build returns
    /// an error.
    pub async fn get_with<F, Fut, E>(&self, key: K, producer: F) -> Result<(V, Freshness), E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let keyspace = self.inner.keyspace;
        if let Some((value, freshness)) = self.peek(&key) {
            self.touch(&key);
            match freshness {
                Freshness::Fresh => {
                    metrics().counter_inc_with("kobs_cache_hits_total", &[("keyspace", keyspace)])
                }
                _ => {
                    metrics().counter_inc_with("kobs_cache_stale_total", &[("keyspace", keyspace)]);
                    self.spawn_refresh(key, producer);
                }
            }
            return Ok((value, freshness));
        }

        metrics().counter_inc_with("kobs_cache_misses_total", &[("keyspace", keyspace)]);
        let result = self.build(key.clone(), producer).await;
        self.release_fence(&key);
        result
    }

    async fn build<F, Fut, E>(&self, key: K, producer: F) -> Result<(V, Freshness), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let fence = self.fence(&key);
        let _guard = fence.lock_owned().await;

        // Another reader may have finished the build while we waited.
        if let Some(hit) = self.peek(&key) {
            self.touch(&key);
            return Ok(hit);
        }

        debug!(keyspace = self.inner.keyspace, "building cache entry");
        let value = producer().await?;
        self.store(key, value.clone());
        Ok((value, Freshness::Miss))
    }

    /// Rebuild `key` synchronously regardless of its freshness.
    pub async fn refresh<F, Fut, E>(&self, key: K, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let fence = self.fence(&key);
        let guard = fence.lock_owned().await;
        let result = producer().await;
        if let Ok(value) = &result {
            self.store(key.clone(), value.clone());
        }
        drop(guard);
        self.release_fence(&key);
        result
    }

    fn spawn_refresh<F, Fut, E>(&self, key: K, producer: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let fence = self.fence(&key);
        let Ok(guard) = fence.try_lock_owned() else {
            debug!(
                keyspace = self.inner.keyspace,
                "refresh already in flight"
            );
            return;
        };
        self.inner.refreshing.lock().insert(key.clone());
        let mark = RefreshMark {
            cache: self.clone(),
            key: key.clone(),
        };

        let cache = self.clone();
        tokio::spawn(async move {
            let _mark = mark;
            let _guard = guard;
            match producer().await {
                Ok(value) => {
                    debug!(keyspace = cache.inner.keyspace, "background refresh done");
                    cache.store(key.clone(), value);
                }
                Err(e) => {
                    metrics().counter_inc_with(
                        "kobs_cache_refresh_failures_total",
                        &[("keyspace", cache.inner.keyspace)],
                    );
                    warn!(
                        keyspace = cache.inner.keyspace,
                        error = %e,
                        "background refresh failed, keeping stale value"
                    );
                }
            }
        });
    }

    fn fence(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        let mut fences = self.inner.fences.lock();
        Arc::clone(
            fences
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Drop the fence of `key` once nobody holds or waits on it.
    fn release_fence(&self, key: &K) {
        let mut fences = self.inner.fences.lock();
        if fences.get(key).is_some_and(|fence| Arc::strong_count(fence) == 1) {
            fences.remove(key);
        }
    }

    fn touch(&self, key: &K) {
        if let Some(entry) = self.inner.entries.write().get_mut(key) {
            entry.last_read = Instant::now();
        }
    }

    fn store(&self, key: K, value: V) {
        let now = Instant::now();
        let idle = self.inner.ttl * 2;
        let mut entries = self.inner.entries.write();
        let before = entries.len();
        entries.retain(|k, entry| *k == key || now.duration_since(entry.last_read) < idle);

        if let Some(max) = self.inner.max_entries {
            while entries.len() >= max && !entries.contains_key(&key) {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_read)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(oldest) => {
                        entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
        let evicted = before.saturating_sub(entries.len());
        if evicted > 0 {
            debug!(keyspace = self.inner.keyspace, evicted, "evicted cache entries");
        }

        entries.insert(
            key,
            Entry {
                value,
                last_success: now,
                last_read: now,
            },
        );
    }
}

/// Clears the refreshing mark of a key when its background refresh ends,
/// including when the producer panics.
struct RefreshMark<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache: RefreshingCache<K, V>,
    key: K,
}

impl<K, V> Drop for RefreshMark<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.cache.inner.refreshing.lock().remove(&self.key);
        self.cache.release_fence(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const TTL: Duration = Duration::from_secs(60);

    fn counting_producer(
        calls: &Arc<AtomicUsize>,
        value: &'static str,
    ) -> impl FnOnce() -> std::future::Ready<anyhow::Result<&'static str>> + Send + 'static {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value))
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn miss_fresh_stale_and_coalesced_refresh() {
        let cache: RefreshingCache<&'static str, &'static str> =
            RefreshingCache::new("topology", TTL);
        let calls = Arc::new(AtomicUsize::new(0));

        // 1. miss blocks on the producer
        let (v, f) = cache
            .get_with("global", counting_producer(&calls, "v1"))
            .await
            .unwrap();
        assert_eq!((v, f), ("v1", Freshness::Miss));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // 2. within ttl: no upstream call
        let (v, f) = cache
            .get_with("global", counting_producer(&calls, "unused"))
            .await
            .unwrap();
        assert_eq!((v, f), ("v1", Freshness::Fresh));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // 3. after ttl: stale value and one refresh that stays in flight
        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        let release = Arc::new(Notify::new());
        let producer = {
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                release.notified().await;
                Ok::<_, anyhow::Error>("v2")
            }
        };
        let (v, f) = cache.get_with("global", producer).await.unwrap();
        assert_eq!((v, f), ("v1", Freshness::Stale));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.state(&"global"), CacheState::Refreshing);

        // 4. during the refresh: no second upstream call
        let (v, f) = cache
            .get_with("global", counting_producer(&calls, "v3"))
            .await
            .unwrap();
        assert_eq!((v, f), ("v1", Freshness::Stale));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        release.notify_one();
        settle().await;
        assert_eq!(cache.state(&"global"), CacheState::Ready);
        assert_eq!(cache.peek(&"global"), Some(("v2", Freshness::Fresh)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_background_refresh_keeps_stale_value() {
        let cache: RefreshingCache<u8, u32> = RefreshingCache::new("teams", TTL);
        cache
            .get_with(1, || async { Ok::<_, anyhow::Error>(7) })
            .await
            .unwrap();
        tokio::time::advance(TTL * 2).await;

        let (v, f) = cache
            .get_with(1, || async { Err::<u32, _>(anyhow::anyhow!("cluster down")) })
            .await
            .unwrap();
        assert_eq!((v, f), (7, Freshness::Stale));
        settle().await;

        assert_eq!(cache.state(&1), CacheState::Ready);
        assert_eq!(cache.peek(&1), Some((7, Freshness::Stale)));
    }

    #[tokio::test]
    async fn failed_miss_propagates_error() {
        let cache: RefreshingCache<u8, u32> = RefreshingCache::new("tags", TTL);
        let result = cache
            .get_with(1, || async { Err::<u32, _>(anyhow::anyhow!("boom")) })
            .await;
        assert_eq!(result.unwrap_err().to_string(), "boom");
        assert_eq!(cache.state(&1), CacheState::Empty);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_build() {
        let cache: RefreshingCache<u8, u32> = RefreshingCache::new("topology", TTL);
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let first = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                cache
                    .get_with(1, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok::<_, anyhow::Error>(1)
                    })
                    .await
            })
        };
        settle().await;
        assert_eq!(cache.state(&1), CacheState::Building);

        let second = {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_with(1, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(2)
                    })
                    .await
            })
        };
        settle().await;
        release.notify_one();

        assert_eq!(first.await.unwrap().unwrap(), (1, Freshness::Miss));
        assert_eq!(second.await.unwrap().unwrap(), (1, Freshness::Fresh));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entries_are_evicted() {
        let cache: RefreshingCache<u32, u32> = RefreshingCache::new("users", TTL);
        for key in 0..3 {
            cache
                .get_with(key, move || async move { Ok::<_, anyhow::Error>(key) })
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 3);

        tokio::time::advance(TTL).await;
        // key 0 is read, so it stays; 1 and 2 go idle.
        cache
            .get_with(0, || async { Ok::<_, anyhow::Error>(0) })
            .await
            .unwrap();
        settle().await;
        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        cache
            .get_with(9, || async { Ok::<_, anyhow::Error>(9) })
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&0).is_some());
        assert!(cache.peek(&1).is_none());
        assert!(cache.peek(&9).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn capped_keyspace_drops_least_recently_read() {
        let cache: RefreshingCache<u32, u32> =
            RefreshingCache::new("users", TTL).with_max_entries(2);
        for key in [1, 2] {
            cache
                .get_with(key, move || async move { Ok::<_, anyhow::Error>(key) })
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        cache
            .get_with(1, || async { Ok::<_, anyhow::Error>(1) })
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        cache
            .get_with(3, || async { Ok::<_, anyhow::Error>(3) })
            .await
            .unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&1).is_some());
        assert!(cache.peek(&2).is_none());
        assert!(cache.peek(&3).is_some());
    }

    #[tokio::test]
    async fn fences_do_not_outlive_builds() {
        let cache: RefreshingCache<u32, u32> = RefreshingCache::new("users", TTL);
        for key in 0..100 {
            cache
                .get_with(key, move || async move { Ok::<_, anyhow::Error>(key) })
                .await
                .unwrap();
        }
        let _ = cache
            .get_with(500, || async { Err::<u32, _>(anyhow::anyhow!("down")) })
            .await;
        cache
            .refresh(0, || async { Ok::<_, anyhow::Error>(1) })
            .await
            .unwrap();
        assert!(cache.inner.fences.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_refresh_clears_refreshing_state() {
        let cache: RefreshingCache<u8, u32> = RefreshingCache::new("teams", TTL);
        cache
            .get_with(1, || async { Ok::<_, anyhow::Error>(7) })
            .await
            .unwrap();
        tokio::time::advance(TTL * 2).await;

        let (v, f) = cache
            .get_with(1, || -> std::future::Ready<anyhow::Result<u32>> {
                panic!("producer bug")
            })
            .await
            .unwrap();
        assert_eq!((v, f), (7, Freshness::Stale));
        settle().await;

        assert_eq!(cache.state(&1), CacheState::Ready);
        assert!(cache.inner.fences.lock().is_empty());
        assert_eq!(cache.peek(&1), Some((7, Freshness::Stale)));
    }

    #[tokio::test]
    async fn ttl_is_clamped_to_minimum() {
        let cache: RefreshingCache<u8, u8> = RefreshingCache::new("tags", Duration::from_secs(1));
        assert_eq!(cache.ttl(), Duration::from_secs(MIN_CACHE_TTL_SECS));
    }

    #[tokio::test]
    async fn forced_refresh_replaces_value() {
        let cache: RefreshingCache<u8, u8> = RefreshingCache::new("users", TTL);
        cache
            .get_with(1, || async { Ok::<_, anyhow::Error>(1) })
            .await
            .unwrap();
        let v = cache
            .refresh(1, || async { Ok::<_, anyhow::Error>(2) })
            .await
            .unwrap();
        assert_eq!(v, 2);
        assert_eq!(cache.peek(&1), Some((2, Freshness::Fresh)));
    }
}
