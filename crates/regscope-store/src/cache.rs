//! In-memory record cache using moka
//!
//! Fronts immutable on-disk records (source documents, chunk indexes)
//! so repeated lookups within a process skip the filesystem. The disk
//! layer stays authoritative; evicting an entry only costs a re-read.

use moka::future::Cache;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of entries in cache
    pub entry_count: u64,
}

/// Concurrent cache of shared, immutable records
pub struct RecordCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    inner: Cache<K, Arc<V>>,
}

impl<K, V> RecordCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create cache with max capacity
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::new(max_capacity),
        }
    }

    /// Create cache with time-based expiration
    #[inline]
    #[must_use]
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    #[inline]
    pub async fn insert(&self, key: K, value: Arc<V>) {
        self.inner.insert(key, value).await;
    }

    #[inline]
    pub async fn get(&self, key: &K) -> Option<Arc<V>> {
        self.inner.get(key).await
    }

    /// Return the cached value or load it, caching only successes
    ///
    /// # Errors
    /// Propagates the loader's error; nothing is cached in that case
    pub async fn try_get_or_insert_with<E, F, Fut>(&self, key: K, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(cached) = self.inner.get(&key).await {
            return Ok(cached);
        }
        let value = Arc::new(load().await?);
        self.inner.insert(key, Arc::clone(&value)).await;
        Ok(value)
    }

    #[inline]
    pub async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    /// Flush pending maintenance so counts are exact
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
        }
    }
}

impl<K, V> Clone for RecordCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for RecordCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCache")
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}

impl<K, V> Default for RecordCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create cache with default capacity (10,000 entries)
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn insert_and_get() {
        let cache: RecordCache<String, String> = RecordCache::new(100);
        cache
            .insert("2024-1".to_string(), Arc::new("text".to_string()))
            .await;
        assert_eq!(
            cache.get(&"2024-1".to_string()).await.as_deref(),
            Some(&"text".to_string())
        );
        assert!(cache.get(&"missing".to_string()).await.is_none());
    }

    #[tokio::test]
    async fn loader_runs_once() {
        let cache: RecordCache<u32, String> = RecordCache::default();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let value = cache
                .try_get_or_insert_with(7, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>("loaded".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value.as_str(), "loaded");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache: RecordCache<u32, String> = RecordCache::new(10);
        let first = cache
            .try_get_or_insert_with(1, || async { Err::<String, _>("boom") })
            .await;
        assert!(first.is_err());
        let second = cache
            .try_get_or_insert_with(1, || async { Ok::<_, &str>("ok".to_string()) })
            .await
            .unwrap();
        assert_eq!(second.as_str(), "ok");
    }

    #[tokio::test]
    async fn invalidation_and_stats() {
        let cache: RecordCache<u32, u32> = RecordCache::new(100);
        for i in 0..5 {
            cache.insert(i, Arc::new(i * 2)).await;
        }
        cache.sync().await;
        assert_eq!(cache.stats().entry_count, 5);

        cache.invalidate(&3).await;
        assert!(cache.get(&3).await.is_none());
    }
}
