//! Redis-backed distributed lock.
//!
//! Acquisition is `SET key token NX PX lease`, retried every
//! `retry_interval`. While held, a watchdog task extends the lease every
//! `lease / 3`, so a crashed holder frees the lock within one lease.
//! Release and renewal only act if the key still carries this handle's token.

use super::{DistributedLock, Interrupter, LockProvider};
use crate::config::{LockConfig, RedisConfig};
use crate::error::{Error, Result};
use crate::store::redis::create_pool;
use crate::store::ttl_millis;
use deadpool_redis::Pool;
use parking_lot::Mutex;
use redis::Script;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

const RENEW_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Hands out [`RedisLock`] handles.
#[derive(Clone)]
pub struct RedisLockProvider {
    pool: Pool,
    config: LockConfig,
    interrupter: Interrupter,
}

impl RedisLockProvider {
    /// Create a provider on an existing pool, e.g. the one used by
    /// [`RedisStore`](crate::store::RedisStore).
    pub fn new(pool: Pool, config: LockConfig) -> Self {
        RedisLockProvider {
            pool,
            config,
            interrupter: Interrupter::new(),
        }
    }

    /// Create a provider with its own connection pool.
    ///
    /// # Errors
    /// Returns `Err` if connection pool creation fails
    pub fn from_config(redis: &RedisConfig, config: LockConfig) -> Result<Self> {
        Ok(Self::new(create_pool(redis)?, config))
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }
}

impl LockProvider for RedisLockProvider {
    type Lock = RedisLock;

    fn lock(&self, name: &str) -> RedisLock {
        RedisLock {
            name: name.to_string(),
            key: self.config.key_for(name),
            token: uuid::Uuid::new_v4().to_string(),
            pool: self.pool.clone(),
            lease: self.config.lease,
            retry_interval: self.config.retry_interval,
            interrupter: self.interrupter.clone(),
            held: AtomicBool::new(false),
            watchdog: Mutex::new(None),
        }
    }

    fn interrupter(&self) -> &Interrupter {
        &self.interrupter
    }
}

/// Handle on one Redis lock, identified by a random token.
pub struct RedisLock {
    name: String,
    key: String,
    token: String,
    pool: Pool,
    lease: Duration,
    retry_interval: Duration,
    interrupter: Interrupter,
    held: AtomicBool,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl RedisLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    async fn try_set(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&self.token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(self.lease))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    fn start_watchdog(&self) {
        let pool = self.pool.clone();
        let key = self.key.clone();
        let token = self.token.clone();
        let lease = self.lease;
        let period = (lease / 3).max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match renew(&pool, &key, &token, lease).await {
                    Ok(true) => debug!("Lease on {} renewed", key),
                    Ok(false) => {
                        warn!("⚠ Lease on {} lost before release", key);
                        break;
                    }
                    Err(e) => warn!("⚠ Failed to renew lease on {}: {}", key, e),
                }
            }
        });

        let previous = self.watchdog.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_watchdog(&self) {
        let watchdog = self.watchdog.lock().take();
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
    }
}

async fn renew(pool: &Pool, key: &str, token: &str, lease: Duration) -> Result<bool> {
    let mut conn = pool.get().await?;
    let renewed: i64 = Script::new(RENEW_SCRIPT)
        .key(key)
        .arg(token)
        .arg(ttl_millis(lease))
        .invoke_async(&mut conn)
        .await?;
    Ok(renewed == 1)
}

impl DistributedLock for RedisLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(&self, wait: Option<Duration>) -> Result<bool> {
        if self.is_held() {
            return Ok(true);
        }

        let deadline = wait.map(|wait| Instant::now() + wait);
        let mut interruption = self.interrupter.subscribe();

        loop {
            if self.try_set().await? {
                self.held.store(true, Ordering::SeqCst);
                self.start_watchdog();
                debug!("✓ Redis lock {} acquired", self.key);
                return Ok(true);
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.retry_interval.min(deadline - now)
                }
                None => self.retry_interval,
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = interruption.interrupted() => {
                    return Err(Error::LockInterrupted {
                        name: self.name.clone(),
                    });
                }
            }
        }
    }

    async fn release(&self) -> Result<()> {
        if !self.held.swap(false, Ordering::SeqCst) {
            return Err(Error::LockNotHeld {
                name: self.name.clone(),
            });
        }
        self.stop_watchdog();

        let mut conn = self.pool.get().await?;
        let released: i64 = Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await?;

        if released == 0 {
            // The lease ran out and the key expired or moved to another holder.
            return Err(Error::LockNotHeld {
                name: self.name.clone(),
            });
        }
        debug!("✓ Redis lock {} released", self.key);
        Ok(())
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl Drop for RedisLock {
    fn drop(&mut self) {
        self.stop_watchdog();
    }
}
