//! Error types shared by the caches, the stores and the lock coordinator.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for open-cache.
///
/// Transport failures from the Redis client are carried transparently so
/// callers see the underlying error, not a re-worded copy of it.
#[derive(Error, Debug)]
pub enum Error {
    /// The local cache was used before `configure` was called.
    #[error("local cache used before configure()")]
    UninitializedCache,

    /// Stored hash fields could not populate the requested record.
    #[error("cannot map field `{field}`: {reason}")]
    FieldMapping { field: String, reason: String },

    /// The wait for a lock was interrupted before it was acquired.
    #[error("wait for lock `{name}` was interrupted")]
    LockInterrupted { name: String },

    /// A bounded lock wait elapsed without acquiring the lock.
    #[error("lock `{name}` not acquired within {waited:?}")]
    LockTimeout { name: String, waited: Duration },

    /// `release` was called on a handle that does not hold its lock.
    #[error("lock `{name}` is not held by this handle")]
    LockNotHeld { name: String },

    /// Invalid configuration or backend construction failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A value could not be encoded to or decoded from its stored form.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure reported by a non-Redis store (wrong type, outage).
    #[error("backend error: {0}")]
    Backend(String),

    #[cfg(feature = "redis")]
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[cfg(feature = "redis")]
    #[error(transparent)]
    Pool(#[from] deadpool_redis::PoolError),
}

/// Convenience Result type for open-cache.
pub type Result<T> = std::result::Result<T, Error>;
