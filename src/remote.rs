//! Typed remote cache over a [`RemoteStore`].
//!
//! Values are stored as JSON text. Every write that takes a duration
//! (re)applies it to the whole key, so a hash shares one TTL across its
//! fields and every increment restarts the countdown.

use crate::config::RemoteCacheConfig;
use crate::error::Result;
use crate::fields::{self, FieldMap};
use crate::store::RemoteStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::time::Duration;

/// Remote key/value and key/field operations for values of type `V`.
pub struct RemoteCache<S, V> {
    store: S,
    config: RemoteCacheConfig,
    _value: PhantomData<fn() -> V>,
}

impl<S: Clone, V> Clone for RemoteCache<S, V> {
    fn clone(&self) -> Self {
        RemoteCache {
            store: self.store.clone(),
            config: self.config.clone(),
            _value: PhantomData,
        }
    }
}

impl<S, V> RemoteCache<S, V>
where
    S: RemoteStore,
    V: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(store: S) -> Self {
        Self::with_config(store, RemoteCacheConfig::default())
    }

    pub fn with_config(store: S, config: RemoteCacheConfig) -> Self {
        RemoteCache {
            store,
            config,
            _value: PhantomData,
        }
    }

    /// Underlying store handle (for advanced use).
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Write `value` under `key`, expiring after `ttl`. Overwrites.
    pub async fn set(&self, key: &str, value: &V, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.store.set(key, json, ttl).await
    }

    /// Read `key`; `None` if absent or expired.
    pub async fn get(&self, key: &str) -> Result<Option<V>> {
        match self.store.get(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Store `record` as a hash of its present fields, then apply `ttl` to
    /// the whole key. A record with no present fields writes nothing.
    pub async fn set_field_map<R: FieldMap>(
        &self,
        key: &str,
        record: &R,
        ttl: Duration,
    ) -> Result<()> {
        let fields = fields::flatten(record);
        if fields.is_empty() {
            debug!("No fields to store for {}", key);
            return Ok(());
        }

        self.store.hset_multiple(key, &fields).await?;
        self.store.expire(key, ttl).await?;
        debug!("✓ Stored {} fields under {} (TTL: {:?})", fields.len(), key, ttl);
        Ok(())
    }

    /// Write one field, then apply `ttl` to the whole key (all its fields).
    pub async fn set_field(&self, key: &str, field: &str, value: &V, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.store.hset(key, field, json).await?;
        self.store.expire(key, ttl).await?;
        Ok(())
    }

    /// Read one field written by [`set_field`](Self::set_field).
    pub async fn get_field(&self, key: &str, field: &str) -> Result<Option<V>> {
        match self.store.hget(key, field).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Rebuild a record stored with [`set_field_map`](Self::set_field_map).
    ///
    /// # Errors
    /// Returns `Error::FieldMapping` if the stored fields cannot populate `R`
    pub async fn get_fields<R: FieldMap>(&self, key: &str) -> Result<Option<R>> {
        let map = self.store.hgetall(key).await?;
        if map.is_empty() {
            return Ok(None);
        }
        R::from_fields(&map).map(Some)
    }

    /// Atomically add `delta` (absent counts as 0), then restart the TTL.
    pub async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let value = self.store.incr_by(key, delta).await?;
        self.store.expire(key, ttl).await?;
        debug!("✓ INCR {} by {} -> {}", key, delta, value);
        Ok(value)
    }

    /// [`increment`](Self::increment) by one.
    pub async fn increment_one(&self, key: &str, ttl: Duration) -> Result<i64> {
        self.increment(key, 1, ttl).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.store.exists(key).await
    }

    pub async fn not_exists(&self, key: &str) -> Result<bool> {
        Ok(!self.exists(key).await?)
    }

    /// Set or refresh the expiry of `key` without touching its value.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.store.expire(key, ttl).await?;
        Ok(())
    }

    /// Remove `key`; no-op if absent.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store.del(key).await?;
        Ok(())
    }

    /// Write only if `key` is absent; returns whether the write happened.
    ///
    /// The TTL is applied whether or not the write happened, so a losing
    /// call still restarts the existing key's countdown.
    pub async fn set_if_absent(&self, key: &str, value: &V, ttl: Duration) -> Result<bool> {
        let json = serde_json::to_string(value)?;
        let written = self.store.set_nx(key, json).await?;
        self.store.expire(key, ttl).await?;
        debug!("SETNX {} -> {}", key, if written { "SET" } else { "EXISTS" });
        Ok(written)
    }

    /// Claim `key` as an idempotency token.
    ///
    /// Returns `true` when the token was already claimed, i.e. the caller
    /// is looking at a replay and should skip processing; `false` for the
    /// first claim.
    pub async fn claim_idempotency_token(
        &self,
        key: &str,
        value: &V,
        ttl: Duration,
    ) -> Result<bool> {
        let first = self.set_if_absent(key, value, ttl).await?;
        if !first {
            info!("Duplicate operation detected for token {}", key);
        }
        Ok(!first)
    }

    /// Remaining TTL of `key`.
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.store.ttl(key).await
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.store.health_check().await
    }
}
