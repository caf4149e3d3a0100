//! Facade bundling the local cache, the remote cache and the lock coordinator.

use crate::error::{Error, Result};
use crate::local::LocalCache;
use crate::lock::{LockCoordinator, LockProvider};
use crate::remote::RemoteCache;
use crate::store::RemoteStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// The caches and locks an application works with, injected at construction.
///
/// All three parts are independent handles; `CacheService` only adds the
/// compositions that need more than one of them.
///
/// # Example
///
/// ```no_run
/// # use open_cache::builder::CacheServiceBuilder;
/// # use open_cache::error::{Error, Result};
/// # use std::time::Duration;
/// # async fn example() -> Result<()> {
/// let service = CacheServiceBuilder::<String>::new().build_in_memory()?;
///
/// let profile = service
///     .get_or_load("profile:7", Duration::from_secs(300), |key| {
///         let key = key.to_string();
///         async move { Ok::<_, Error>(format!("loaded {key}")) }
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct CacheService<V, S, P> {
    local: LocalCache<V>,
    remote: RemoteCache<S, V>,
    locks: LockCoordinator<P>,
}

impl<V, S, P> CacheService<V, S, P>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: RemoteStore,
    P: LockProvider,
{
    pub fn new(local: LocalCache<V>, remote: RemoteCache<S, V>, locks: LockCoordinator<P>) -> Self {
        CacheService {
            local,
            remote,
            locks,
        }
    }

    pub fn local(&self) -> &LocalCache<V> {
        &self.local
    }

    pub fn remote(&self) -> &RemoteCache<S, V> {
        &self.remote
    }

    pub fn locks(&self) -> &LockCoordinator<P> {
        &self.locks
    }

    /// Read `key` from the remote cache, loading it under the lock named
    /// `key` on a miss.
    ///
    /// Only one caller across all processes runs `load` for a missing key;
    /// the others find the value on their re-read once the lock is theirs.
    /// A failed load writes nothing and its error is returned as is.
    pub async fn get_or_load<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        load: F,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce(&str) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: From<Error>,
    {
        if let Some(value) = self.remote.get(key).await? {
            debug!("✓ Remote hit for {}", key);
            return Ok(value);
        }

        debug!("Remote miss for {}, loading under lock", key);
        let remote = &self.remote;
        self.locks
            .with_lock(key, move || async move {
                if let Some(value) = remote.get(key).await? {
                    debug!("✓ {} loaded by another holder", key);
                    return Ok(value);
                }
                let value = load(key).await?;
                remote.set(key, &value, ttl).await?;
                Ok::<_, E>(value)
            })
            .await?
    }

    /// Run `action` only for the first claim of `token_key`.
    ///
    /// Returns `None` without running `action` when the token was already
    /// claimed (a replay), `Some` with its output otherwise.
    pub async fn run_once<T, F, Fut>(
        &self,
        token_key: &str,
        marker: &V,
        ttl: Duration,
        action: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self
            .remote
            .claim_idempotency_token(token_key, marker, ttl)
            .await?
        {
            return Ok(None);
        }
        Ok(Some(action().await))
    }
}
