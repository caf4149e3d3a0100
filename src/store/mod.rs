//! Remote store capability and its implementations.
//!
//! [`RemoteStore`] is the raw, string-level command surface the typed
//! [`RemoteCache`](crate::remote::RemoteCache) is built on. Each method is
//! one round trip; atomicity is whatever the store gives a single command.

use crate::error::Result;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

#[cfg(feature = "inmemory")]
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "inmemory")]
pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Commands a shared key-value store must support.
///
/// Implemented by [`RedisStore`] for production and by [`InMemoryStore`]
/// for tests and single-node deployments. Errors are returned as the store
/// reports them; implementations do not retry.
pub trait RemoteStore: Send + Sync {
    /// Read a string value. `None` if absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Write a string value that expires after `ttl`.
    fn set(&self, key: &str, value: String, ttl: Duration)
        -> impl Future<Output = Result<()>> + Send;

    /// Write only if the key is absent. Returns whether the write happened.
    /// Leaves the expiry of an existing key untouched.
    fn set_nx(&self, key: &str, value: String) -> impl Future<Output = Result<bool>> + Send;

    /// Write one hash field. Does not change the key's expiry.
    fn hset(&self, key: &str, field: &str, value: String)
        -> impl Future<Output = Result<()>> + Send;

    /// Write several hash fields in one command.
    fn hset_multiple(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Read one hash field.
    fn hget(&self, key: &str, field: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Read every field of a hash. Empty if the key is absent.
    fn hgetall(&self, key: &str) -> impl Future<Output = Result<HashMap<String, String>>> + Send;

    /// Atomically add `delta` to an integer value, starting from 0.
    fn incr_by(&self, key: &str, delta: i64) -> impl Future<Output = Result<i64>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Set the key's expiry. Returns false if the key does not exist.
    fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<bool>> + Send;

    /// Remove the key. Returns whether it existed.
    fn del(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Remaining time to live; `None` if absent or persistent.
    fn ttl(&self, key: &str) -> impl Future<Output = Result<Option<Duration>>> + Send;

    /// Check store connectivity.
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send;
}

/// Largest expiry sent to the store. Redis rejects expiries that overflow
/// its millisecond clock when added to the current time.
#[cfg(feature = "redis")]
const MAX_EXPIRY_MILLIS: u64 = i64::MAX as u64 / 2;

/// Milliseconds for an expiry command, clamped to `1..=MAX_EXPIRY_MILLIS`;
/// stores reject a zero expiry.
#[cfg(feature = "redis")]
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, MAX_EXPIRY_MILLIS)
}
