//! Builder wiring a [`CacheService`] from configuration.

use crate::config::{CacheConfig, LocalCacheConfig, LockConfig, RedisConfig};
use crate::error::Result;
use crate::local::LocalCache;
use crate::lock::LockCoordinator;
use crate::remote::RemoteCache;
use crate::service::CacheService;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::time::Duration;

#[cfg(feature = "inmemory")]
use crate::lock::LocalLockProvider;
#[cfg(feature = "inmemory")]
use crate::store::InMemoryStore;

#[cfg(feature = "redis")]
use crate::lock::RedisLockProvider;
#[cfg(feature = "redis")]
use crate::store::redis::{create_pool, RedisStore};

/// Fluent builder for a [`CacheService`] over values of type `V`.
///
/// # Example
///
/// ```ignore
/// use open_cache::builder::CacheServiceBuilder;
/// use open_cache::config::CacheConfig;
/// use std::time::Duration;
///
/// let service = CacheServiceBuilder::<Order>::from_config(CacheConfig::from_env())
///     .with_local(10_000, Duration::from_secs(600))
///     .with_remote_ttl(Duration::from_secs(3600))
///     .build_redis()?;
/// ```
pub struct CacheServiceBuilder<V> {
    config: CacheConfig,
    _value: PhantomData<fn() -> V>,
}

impl<V> CacheServiceBuilder<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Start from default settings.
    pub fn new() -> Self {
        Self::from_config(CacheConfig::default())
    }

    pub fn from_config(config: CacheConfig) -> Self {
        CacheServiceBuilder {
            config,
            _value: PhantomData,
        }
    }

    /// Size bound and expire-after-write TTL of the local cache.
    pub fn with_local(mut self, max_entries: u64, ttl: Duration) -> Self {
        self.config.local = LocalCacheConfig::new(max_entries, ttl);
        self
    }

    /// TTL used by remote writes that do not name one.
    pub fn with_remote_ttl(mut self, ttl: Duration) -> Self {
        self.config.remote.default_ttl = ttl;
        self
    }

    pub fn with_redis(mut self, redis: RedisConfig) -> Self {
        self.config.redis = redis;
        self
    }

    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.config.lock = lock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Build on the in-memory store and in-process locks.
    ///
    /// # Errors
    /// Returns `Error::Config` if the configuration is invalid
    #[cfg(feature = "inmemory")]
    pub fn build_in_memory(self) -> Result<CacheService<V, InMemoryStore, LocalLockProvider>> {
        self.config.validate()?;

        let service = CacheService::new(
            LocalCache::with_config(&self.config.local)?,
            RemoteCache::with_config(InMemoryStore::new(), self.config.remote),
            LockCoordinator::new(LocalLockProvider::new()),
        );
        info!("✓ Cache service built on the in-memory store");
        Ok(service)
    }

    /// Build on Redis. The store and the lock provider share one pool.
    ///
    /// # Errors
    /// Returns `Error::Config` if the configuration is invalid or the pool
    /// cannot be created
    #[cfg(feature = "redis")]
    pub fn build_redis(self) -> Result<CacheService<V, RedisStore, RedisLockProvider>> {
        self.config.validate()?;

        let pool = create_pool(&self.config.redis)?;
        let store = RedisStore::from_pool(pool.clone(), self.config.redis.key_prefix.clone());

        let service = CacheService::new(
            LocalCache::with_config(&self.config.local)?,
            RemoteCache::with_config(store, self.config.remote),
            LockCoordinator::new(RedisLockProvider::new(pool, self.config.lock)),
        );
        info!("✓ Cache service built on Redis at {}", self.config.redis.url);
        Ok(service)
    }
}

impl<V> Default for CacheServiceBuilder<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
