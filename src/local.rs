//! Local bounded cache backed by moka.
//!
//! Size-bounded (LRU) and expire-after-write. Concurrent misses on the same
//! key share one computation.

use crate::config::LocalCacheConfig;
use crate::error::{Error, Result};
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// In-process cache with compute-if-absent reads.
///
/// Starts unconfigured: every operation fails with
/// [`Error::UninitializedCache`] until [`configure`](LocalCache::configure)
/// has been called.
///
/// # Example
///
/// ```no_run
/// # use open_cache::local::LocalCache;
/// # use open_cache::error::{Error, Result};
/// # use std::time::Duration;
/// # async fn example() -> Result<()> {
/// let cache: LocalCache<String> = LocalCache::new();
/// cache.configure(1_000, Duration::from_secs(600))?;
///
/// let name = cache
///     .get_or_compute("user:7", |key| {
///         let key = key.to_string();
///         async move { Ok::<_, Error>(format!("loaded {key}")) }
///     })
///     .await
///     .map_err(|e| Error::Backend(e.to_string()))?;
/// # Ok(())
/// # }
/// ```
pub struct LocalCache<V> {
    inner: RwLock<Option<Cache<String, V>>>,
}

impl<V> LocalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an unconfigured cache.
    pub fn new() -> Self {
        LocalCache {
            inner: RwLock::new(None),
        }
    }

    /// Create a cache and configure it from `config`.
    ///
    /// # Errors
    /// Returns `Error::Config` if the configuration is invalid
    pub fn with_config(config: &LocalCacheConfig) -> Result<Self> {
        let cache = Self::new();
        cache.configure(config.max_entries, config.ttl)?;
        Ok(cache)
    }

    /// (Re)initialize the cache, dropping any previous contents.
    ///
    /// # Errors
    /// Returns `Error::Config` for a zero size bound or a zero TTL
    pub fn configure(&self, max_entries: u64, ttl: Duration) -> Result<()> {
        LocalCacheConfig::new(max_entries, ttl).validate()?;

        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        let previous = self.inner.write().replace(cache);
        if let Some(previous) = previous {
            previous.invalidate_all();
            debug!("Local cache reconfigured, previous contents dropped");
        }

        info!(
            "✓ Local cache configured (max entries: {}, ttl: {:?})",
            max_entries, ttl
        );
        Ok(())
    }

    fn cache(&self) -> Result<Cache<String, V>> {
        self.inner.read().clone().ok_or(Error::UninitializedCache)
    }

    /// Insert or overwrite `key`, restarting its TTL.
    pub async fn put(&self, key: &str, value: V) -> Result<()> {
        let cache = self.cache()?;
        cache.insert(key.to_string(), value).await;
        // Apply evictions now so the size bound holds when put returns.
        cache.run_pending_tasks().await;
        debug!("✓ Local PUT {}", key);
        Ok(())
    }

    /// Return the cached value, computing and storing it on a miss.
    ///
    /// Concurrent callers missing on the same key wait for a single run of
    /// `compute`; callers on other keys are not blocked. A failed
    /// computation is not cached and its error is handed to every waiting
    /// caller, which is why it comes back as `Arc<E>`.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        compute: F,
    ) -> std::result::Result<V, Arc<E>>
    where
        F: FnOnce(&str) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: From<Error> + Send + Sync + 'static,
    {
        let cache = self.cache().map_err(|e| Arc::new(E::from(e)))?;

        // `compute` is only called if this caller wins the race for the key.
        let value = cache
            .try_get_with(key.to_string(), async move { compute(key).await })
            .await?;
        cache.run_pending_tasks().await;

        Ok(value)
    }

    /// Read without computing on a miss.
    pub async fn get(&self, key: &str) -> Result<Option<V>> {
        let value = self.cache()?.get(key).await;
        debug!(
            "Local GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    /// Delete `key` if present.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.cache()?.invalidate(key).await;
        debug!("✓ Local REMOVE {}", key);
        Ok(())
    }

    /// Drop every entry.
    pub async fn clear(&self) -> Result<()> {
        let cache = self.cache()?;
        cache.invalidate_all();
        cache.run_pending_tasks().await;
        debug!("✓ Local CLEAR");
        Ok(())
    }

    /// True iff an unexpired entry is present. Never computes.
    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.cache()?.contains_key(key))
    }

    /// Exact number of live entries, after pending evictions are applied.
    pub async fn entry_count(&self) -> Result<u64> {
        let cache = self.cache()?;
        cache.run_pending_tasks().await;
        Ok(cache.entry_count())
    }
}

impl<V> Default for LocalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    fn configured(max_entries: u64) -> LocalCache<String> {
        let cache = LocalCache::new();
        cache
            .configure(max_entries, Duration::from_secs(3600))
            .expect("valid config");
        cache
    }

    #[tokio::test]
    async fn test_operations_before_configure_fail() {
        let cache: LocalCache<String> = LocalCache::new();

        assert!(matches!(
            cache.put("a", "1".to_string()).await,
            Err(Error::UninitializedCache)
        ));
        assert!(matches!(cache.exists("a"), Err(Error::UninitializedCache)));
        assert!(matches!(cache.clear().await, Err(Error::UninitializedCache)));

        let err = cache
            .get_or_compute("a", |_| async { Ok::<_, Error>("never".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(*err, Error::UninitializedCache));
    }

    #[test]
    fn test_configure_rejects_zero_bounds() {
        let cache: LocalCache<String> = LocalCache::new();
        assert!(matches!(
            cache.configure(0, Duration::from_secs(1)),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            cache.configure(10, Duration::ZERO),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_put_overwrites_and_remove() {
        let cache = configured(10);

        cache.put("a", "1".to_string()).await.unwrap();
        cache.put("a", "2".to_string()).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), Some("2".to_string()));

        cache.remove("a").await.unwrap();
        assert!(!cache.exists("a").unwrap());

        // Removing an absent key is a no-op
        cache.remove("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_or_compute_returns_cached_value() {
        let cache = configured(10);
        cache.put("a", "cached".to_string()).await.unwrap();

        let value = cache
            .get_or_compute("a", |_| async { Ok::<_, Error>("computed".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "cached");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_get_or_compute_single_flight() {
        let cache = Arc::new(configured(100));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("user:1", |key| {
                        let key = key.to_string();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, Error>(format!("value-of-{key}"))
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "value-of-user:1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_get_or_compute_different_keys_run_in_parallel() {
        let cache = Arc::new(configured(100));
        // Both computations must be in flight at once to pass the barrier.
        let barrier = Arc::new(Barrier::new(2));

        let spawn_compute = |key: &'static str| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(key, |key| {
                        let key = key.to_string();
                        async move {
                            barrier.wait().await;
                            Ok::<_, Error>(key)
                        }
                    })
                    .await
            })
        };

        let a = spawn_compute("a");
        let b = spawn_compute("b");

        let joined = tokio::time::timeout(Duration::from_secs(5), async {
            (a.await.unwrap().unwrap(), b.await.unwrap().unwrap())
        })
        .await
        .expect("computations on different keys should not serialize");
        assert_eq!(joined, ("a".to_string(), "b".to_string()));
    }

    #[tokio::test]
    async fn test_failed_compute_is_not_cached() {
        let cache = configured(10);

        let err = cache
            .get_or_compute("k", |_| async {
                Err::<String, _>(Error::Backend("db down".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(&*err, Error::Backend(msg) if msg == "db down"));
        assert!(!cache.exists("k").unwrap());

        let value = cache
            .get_or_compute("k", |_| async { Ok::<_, Error>("ok".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "ok");
    }

    #[tokio::test]
    async fn test_exists_does_not_compute() {
        let cache = configured(10);
        assert!(!cache.exists("a").unwrap());
        assert_eq!(cache.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entries_expire_after_write() {
        let cache: LocalCache<String> = LocalCache::new();
        cache.configure(10, Duration::from_millis(100)).unwrap();

        cache.put("a", "1".to_string()).await.unwrap();
        assert!(cache.exists("a").unwrap());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!cache.exists("a").unwrap());
        assert_eq!(cache.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_size_bound_evicts_one_of_the_oldest() {
        let cache = configured(2);

        cache.put("a", "1".to_string()).await.unwrap();
        cache.put("b", "2".to_string()).await.unwrap();
        cache.put("c", "3".to_string()).await.unwrap();

        assert!(cache.exists("c").unwrap());
        let survivors = ["a", "b"]
            .iter()
            .filter(|key| cache.exists(key).unwrap())
            .count();
        assert_eq!(survivors, 1);
        assert_eq!(cache.entry_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_clear_and_reconfigure() {
        let cache = configured(10);
        cache.put("a", "1".to_string()).await.unwrap();
        cache.put("b", "2".to_string()).await.unwrap();

        cache.clear().await.unwrap();
        assert_eq!(cache.entry_count().await.unwrap(), 0);

        cache.put("a", "1".to_string()).await.unwrap();
        cache.configure(5, Duration::from_secs(60)).unwrap();
        assert!(!cache.exists("a").unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_entry_count_never_exceeds_bound(
            bound in 1u64..6,
            keys in prop::collection::vec("[a-h]", 1..40),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let cache = configured(bound);
                for (i, key) in keys.iter().enumerate() {
                    if i % 3 == 0 {
                        cache
                            .get_or_compute(key, |k| {
                                let k = k.to_string();
                                async move { Ok::<_, Error>(k) }
                            })
                            .await
                            .unwrap();
                    } else {
                        cache.put(key, i.to_string()).await.unwrap();
                    }
                    let count = cache.entry_count().await.unwrap();
                    prop_assert!(count <= bound, "{} entries with bound {}", count, bound);
                }
                Ok(())
            })?;
        }
    }
}
