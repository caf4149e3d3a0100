//! One key/value surface over both caches.

use crate::error::Result;
use crate::local::LocalCache;
use crate::remote::RemoteCache;
use crate::store::RemoteStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;

/// Plain key/value access shared by [`LocalCache`] and [`RemoteCache`].
///
/// The remote tier writes with its configured default TTL; the local tier
/// with the TTL it was configured with.
pub trait CacheTier<V>: Send + Sync {
    fn put(&self, key: &str, value: V) -> impl Future<Output = Result<()>> + Send;

    fn fetch(&self, key: &str) -> impl Future<Output = Result<Option<V>>> + Send;

    fn contains(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    fn evict(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<V> CacheTier<V> for LocalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn put(&self, key: &str, value: V) -> Result<()> {
        LocalCache::put(self, key, value).await
    }

    async fn fetch(&self, key: &str) -> Result<Option<V>> {
        self.get(key).await
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        self.exists(key)
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.remove(key).await
    }
}

impl<S, V> CacheTier<V> for RemoteCache<S, V>
where
    S: RemoteStore,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    async fn put(&self, key: &str, value: V) -> Result<()> {
        self.set(key, &value, self.default_ttl()).await
    }

    async fn fetch(&self, key: &str) -> Result<Option<V>> {
        self.get(key).await
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        self.exists(key).await
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.delete(key).await
    }
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;
    use crate::config::LocalCacheConfig;
    use crate::store::InMemoryStore;

    async fn exercise<C: CacheTier<String>>(cache: &C) {
        assert!(!cache.contains("k").await.unwrap());
        cache.put("k", "v".to_string()).await.unwrap();
        assert_eq!(cache.fetch("k").await.unwrap(), Some("v".to_string()));
        assert!(cache.contains("k").await.unwrap());
        cache.evict("k").await.unwrap();
        assert_eq!(cache.fetch("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_local_tier() {
        let cache = LocalCache::with_config(&LocalCacheConfig::default()).unwrap();
        exercise(&cache).await;
    }

    #[tokio::test]
    async fn test_remote_tier() {
        let cache: RemoteCache<_, String> = RemoteCache::new(InMemoryStore::new());
        exercise(&cache).await;
    }
}
