//! Redis remote store backed by a deadpool-redis connection pool.

use super::{ttl_millis, RemoteStore};
use crate::config::RedisConfig;
use crate::error::{Error, Result};
use deadpool_redis::{Connection, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

/// Redis store with connection pooling.
///
/// Redis errors are returned unchanged as `Error::Redis`; nothing is retried.
///
/// # Example
///
/// ```no_run
/// # use open_cache::config::RedisConfig;
/// # use open_cache::store::{RedisStore, RemoteStore};
/// # use open_cache::error::Result;
/// # use std::time::Duration;
/// # async fn example() -> Result<()> {
/// let store = RedisStore::new(&RedisConfig::default())?;
/// store.set("key", "value".to_string(), Duration::from_secs(60)).await?;
/// let value = store.get("key").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    key_prefix: Option<String>,
}

impl RedisStore {
    /// Create a store with its own connection pool.
    ///
    /// # Errors
    /// Returns `Err` if connection pool creation fails
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let pool = create_pool(config)?;
        Ok(Self::from_pool(pool, config.key_prefix.clone()))
    }

    /// Create a store on an existing pool, e.g. one shared with the lock provider.
    pub fn from_pool(pool: Pool, key_prefix: Option<String>) -> Self {
        RedisStore { pool, key_prefix }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn prefixed(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}:{}", prefix, key),
            None => key.to_string(),
        }
    }

    async fn conn(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }
}

/// Build a deadpool-redis pool from `config`.
///
/// # Errors
/// Returns `Error::Config` if the URL or pool settings are rejected
pub fn create_pool(config: &RedisConfig) -> Result<Pool> {
    let mut pool_config = deadpool_redis::Config::from_url(config.url.as_str());
    pool_config.pool = Some(PoolConfig::new(config.pool_size));

    let pool = pool_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| Error::Config(format!("Failed to create Redis pool: {}", e)))?;

    info!(
        "✓ Redis pool initialized for {} (pool size: {})",
        config.url, config.pool_size
    );
    Ok(pool)
}

impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(self.prefixed(key)).await?;
        debug!(
            "Redis GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("SET")
            .arg(self.prefixed(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        debug!("✓ Redis SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: String) -> Result<bool> {
        let mut conn = self.conn().await?;
        let written: bool = conn.set_nx(self.prefixed(key), value).await?;
        debug!("Redis SETNX {} -> {}", key, written);
        Ok(written)
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.hset(self.prefixed(key), field, value).await?;
        Ok(())
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let _: () = conn.hset_multiple(self.prefixed(key), fields).await?;
        debug!("✓ Redis HSET {} ({} fields)", key, fields.len());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.hget(self.prefixed(key), field).await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        let map: HashMap<String, String> = conn.hgetall(self.prefixed(key)).await?;
        Ok(map)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(self.prefixed(key), delta).await?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let exists: bool = conn.exists(self.prefixed(key)).await?;
        Ok(exists)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated: bool = conn
            .pexpire(self.prefixed(key), ttl_millis(ttl) as i64)
            .await?;
        Ok(updated)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let deleted: i64 = conn.del(self.prefixed(key)).await?;
        debug!("✓ Redis DEL {}", key);
        Ok(deleted > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn().await?;
        let millis: i64 = conn.pttl(self.prefixed(key)).await?;

        // -2 if the key doesn't exist, -1 if it has no expiry
        if millis < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_millis(millis as u64)))
        }
    }

    async fn health_check(&self) -> Result<bool> {
        match self.pool.get().await {
            Ok(mut conn) => {
                let pong: redis::RedisResult<String> =
                    redis::cmd("PING").query_async(&mut conn).await;
                Ok(pong.is_ok())
            }
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_keys() {
        let pool = create_pool(&RedisConfig::default()).unwrap();

        let store = RedisStore::from_pool(pool.clone(), Some("app".to_string()));
        assert_eq!(store.prefixed("user:1"), "app:user:1");

        let store = RedisStore::from_pool(pool, None);
        assert_eq!(store.prefixed("user:1"), "user:1");
    }

    #[test]
    fn test_invalid_url_is_a_config_error() {
        let config = RedisConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(RedisStore::new(&config), Err(Error::Config(_))));
    }
}
