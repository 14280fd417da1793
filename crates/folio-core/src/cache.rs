//! Small TTL cache for values that are expensive to fetch and rarely change.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::Result;

/// A cached value with the time it was fetched and how long it stays fresh.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Keyed cache that refreshes entries lazily once their TTL has elapsed.
///
/// The lock is held across the fetch so concurrent callers for a stale key do
/// not stampede the backing service.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, fetching it if missing or stale.
    ///
    /// A failed fetch is returned to the caller and leaves any previous entry
    /// untouched.
    pub async fn get_or_refresh<F, Fut>(&self, key: K, ttl: Duration, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(&key) {
            if entry.is_fresh() {
                return Ok(entry.value.clone());
            }
        }

        let value = fetch().await?;
        entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                fetched_at: Instant::now(),
                ttl,
            },
        );
        Ok(value)
    }

    /// Drop the entry for `key`, forcing the next read to fetch.
    pub async fn invalidate(&self, key: &K) {
        self.entries.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fresh_entry_is_not_refetched() {
        let cache: TtlCache<&str, u32> = TtlCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_refresh("k", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_refetches() {
        let cache: TtlCache<&str, usize> = TtlCache::new();
        let calls = AtomicUsize::new(0);

        for expected in 1..=2 {
            let value = cache
                .get_or_refresh("k", Duration::ZERO, || async {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await
                .unwrap();
            assert_eq!(value, expected);
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_entry() {
        let cache: TtlCache<&str, u32> = TtlCache::new();
        cache
            .get_or_refresh("k", Duration::ZERO, || async { Ok(1) })
            .await
            .unwrap();

        let err = cache
            .get_or_refresh("k", Duration::ZERO, || async {
                Err(Error::Request("unreachable".to_string()))
            })
            .await;
        assert!(err.is_err());

        let entries = cache.entries.lock().await;
        assert_eq!(entries.get("k").map(|e| e.value), Some(1));
    }

    #[tokio::test]
    async fn test_invalidate_forces_fetch() {
        let cache: TtlCache<&str, u32> = TtlCache::new();
        cache
            .get_or_refresh("k", Duration::from_secs(60), || async { Ok(1) })
            .await
            .unwrap();
        cache.invalidate(&"k").await;
        let value = cache
            .get_or_refresh("k", Duration::from_secs(60), || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }
}
