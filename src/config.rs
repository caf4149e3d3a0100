//! Configuration for the caches, the Redis pool and the lock service.
//!
//! Every struct has a `Default`; [`CacheConfig::from_env`] overrides the
//! defaults from environment variables.

use crate::error::{Error, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default Redis connection pool size.
/// Formula: (CPU cores × 2) + 1, rounded for 8-core hosts.
/// Override with the REDIS_POOL_SIZE environment variable.
const DEFAULT_POOL_SIZE: usize = 16;

/// Lease used by the lock client this facade replaces.
const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(30);

/// Configuration of the local bounded cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalCacheConfig {
    pub max_entries: u64,
    /// Expire-after-write duration
    pub ttl: Duration,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        LocalCacheConfig {
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl LocalCacheConfig {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        LocalCacheConfig { max_entries, ttl }
    }

    /// # Errors
    /// Returns `Error::Config` for a zero size bound or a zero TTL
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(Error::Config(
                "local cache max_entries must be positive".to_string(),
            ));
        }
        if self.ttl.is_zero() {
            return Err(Error::Config("local cache ttl must be positive".to_string()));
        }
        Ok(())
    }
}

/// Configuration of the typed remote cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCacheConfig {
    /// TTL applied by writes that do not name one (the `CacheTier` surface)
    pub default_ttl: Duration,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        RemoteCacheConfig {
            default_ttl: Duration::from_secs(3600),
        }
    }
}

/// Connection settings for the Redis store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisConfig {
    pub url: String, // e.g., "redis://127.0.0.1:6379"
    pub pool_size: usize,
    /// Namespace prepended as `{prefix}:{key}` to every data key
    pub key_prefix: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            key_prefix: None,
        }
    }
}

/// Settings for distributed locks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockConfig {
    /// Expiry of the lock key; renewed every `lease / 3` while held
    pub lease: Duration,
    /// Pause between acquisition attempts while the lock is taken
    pub retry_interval: Duration,
    pub key_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            lease: DEFAULT_LOCK_LEASE,
            retry_interval: Duration::from_millis(100),
            key_prefix: "lock".to_string(),
        }
    }
}

impl LockConfig {
    /// Full store key of the lock called `name`.
    pub fn key_for(&self, name: &str) -> String {
        format!("{}:{}", self.key_prefix, name)
    }
}

/// Complete configuration of a [`CacheService`](crate::service::CacheService).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheConfig {
    pub local: LocalCacheConfig,
    pub remote: RemoteCacheConfig,
    pub redis: RedisConfig,
    pub lock: LockConfig,
}

impl CacheConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `LOCAL_CACHE_MAX_ENTRIES` (default: 10000)
    /// - `LOCAL_CACHE_TTL_SECS` (default: 3600)
    /// - `REMOTE_CACHE_DEFAULT_TTL_SECS` (default: 3600)
    /// - `REDIS_URL` (default: redis://127.0.0.1:6379)
    /// - `REDIS_POOL_SIZE` (default: 16)
    /// - `REDIS_KEY_PREFIX` (default: none)
    /// - `LOCK_LEASE_MS` (default: 30000)
    /// - `LOCK_RETRY_MS` (default: 100)
    ///
    /// Values that do not parse fall back to the default.
    pub fn from_env() -> Self {
        let defaults = CacheConfig::default();

        CacheConfig {
            local: LocalCacheConfig {
                max_entries: env_or("LOCAL_CACHE_MAX_ENTRIES", defaults.local.max_entries),
                ttl: env_secs("LOCAL_CACHE_TTL_SECS").unwrap_or(defaults.local.ttl),
            },
            remote: RemoteCacheConfig {
                default_ttl: env_secs("REMOTE_CACHE_DEFAULT_TTL_SECS")
                    .unwrap_or(defaults.remote.default_ttl),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or(defaults.redis.url),
                pool_size: env_or("REDIS_POOL_SIZE", defaults.redis.pool_size),
                key_prefix: env::var("REDIS_KEY_PREFIX")
                    .ok()
                    .filter(|prefix| !prefix.is_empty()),
            },
            lock: LockConfig {
                lease: env_millis("LOCK_LEASE_MS").unwrap_or(defaults.lock.lease),
                retry_interval: env_millis("LOCK_RETRY_MS")
                    .unwrap_or(defaults.lock.retry_interval),
                key_prefix: defaults.lock.key_prefix,
            },
        }
    }

    /// # Errors
    /// Returns `Error::Config` naming the first invalid setting
    pub fn validate(&self) -> Result<()> {
        self.local.validate()?;
        if self.remote.default_ttl.is_zero() {
            return Err(Error::Config(
                "remote cache default_ttl must be positive".to_string(),
            ));
        }
        if self.redis.pool_size == 0 {
            return Err(Error::Config("redis pool_size must be positive".to_string()));
        }
        if self.lock.lease.is_zero() || self.lock.retry_interval.is_zero() {
            return Err(Error::Config(
                "lock lease and retry_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}
