//! In-memory remote store.
//!
//! Follows Redis semantics for the commands in [`RemoteStore`]: per-key
//! expiry, hash values, `WRONGTYPE` errors, INCR keeping the existing TTL.
//! Expiry uses tokio's clock, so tests can drive it with a paused runtime.

use super::RemoteStore;
use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Debug)]
enum Stored {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Clone, Debug)]
struct StoredEntry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn persistent(value: Stored) -> Self {
        StoredEntry {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

/// Expiry instant `ttl` from now; `None` when it lies beyond what the clock
/// can represent, which is treated as never expiring.
fn expiry_after(ttl: Duration) -> Option<Instant> {
    Instant::now().checked_add(ttl)
}

fn wrong_type(key: &str) -> Error {
    Error::Backend(format!(
        "WRONGTYPE operation against key {} holding the wrong kind of value",
        key
    ))
}

/// Shared in-memory store. Clones share the same data.
///
/// Useful as a test double for [`RedisStore`](super::RedisStore) and for
/// single-process deployments with no Redis at hand.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<DashMap<String, StoredEntry>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while unavailable every command fails.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
        if !available {
            warn!("⚠ In-memory store marked unavailable");
        }
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Backend("store unavailable".to_string()));
        }
        Ok(())
    }

    /// Run `f` on the live entry for `key`, if any.
    fn read<T>(&self, key: &str, f: impl FnOnce(&StoredEntry) -> Result<T>) -> Result<Option<T>> {
        self.check_available()?;
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => f(&entry).map(Some),
            _ => Ok(None),
        }
    }

    /// Run `f` on the entry slot for `key`; an expired entry reads as vacant.
    fn write<T>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&mut StoredEntry>) -> Result<(Option<StoredEntry>, T)>,
    ) -> Result<T> {
        self.check_available()?;
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    let (replacement, out) = f(None)?;
                    match replacement {
                        Some(entry) => {
                            occupied.insert(entry);
                        }
                        None => {
                            occupied.remove();
                        }
                    }
                    Ok(out)
                } else {
                    let (replacement, out) = f(Some(occupied.get_mut()))?;
                    if let Some(entry) = replacement {
                        occupied.insert(entry);
                    }
                    Ok(out)
                }
            }
            MapEntry::Vacant(vacant) => {
                let (replacement, out) = f(None)?;
                if let Some(entry) = replacement {
                    vacant.insert(entry);
                }
                Ok(out)
            }
        }
    }

    fn hash_write(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        self.write(key, |slot| match slot {
            Some(StoredEntry {
                value: Stored::Hash(map),
                ..
            }) => {
                map.extend(fields);
                Ok((None, ()))
            }
            Some(_) => Err(wrong_type(key)),
            None => Ok((
                Some(StoredEntry::persistent(Stored::Hash(
                    fields.into_iter().collect(),
                ))),
                (),
            )),
        })
    }
}

impl RemoteStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .read(key, |entry| match &entry.value {
                Stored::Str(value) => Ok(value.clone()),
                Stored::Hash(_) => Err(wrong_type(key)),
            })?;
        debug!(
            "Memory GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let entry = StoredEntry {
            value: Stored::Str(value),
            expires_at: expiry_after(ttl),
        };
        self.write(key, |_| Ok((Some(entry), ())))?;
        debug!("✓ Memory SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: String) -> Result<bool> {
        self.write(key, |slot| match slot {
            Some(_) => Ok((None, false)),
            None => Ok((Some(StoredEntry::persistent(Stored::Str(value))), true)),
        })
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<()> {
        self.hash_write(key, vec![(field.to_string(), value)])
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        self.hash_write(key, fields.to_vec())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let value = self.read(key, |entry| match &entry.value {
            Stored::Hash(map) => Ok(map.get(field).cloned()),
            Stored::Str(_) => Err(wrong_type(key)),
        })?;
        Ok(value.flatten())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let map = self.read(key, |entry| match &entry.value {
            Stored::Hash(map) => Ok(map.clone()),
            Stored::Str(_) => Err(wrong_type(key)),
        })?;
        Ok(map.unwrap_or_default())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.write(key, |slot| match slot {
            Some(StoredEntry {
                value: Stored::Str(raw),
                ..
            }) => {
                let current: i64 = raw.parse().map_err(|_| {
                    Error::Backend("value is not an integer or out of range".to_string())
                })?;
                let next = current.checked_add(delta).ok_or_else(|| {
                    Error::Backend("increment or decrement would overflow".to_string())
                })?;
                *raw = next.to_string();
                Ok((None, next))
            }
            Some(_) => Err(wrong_type(key)),
            None => Ok((
                Some(StoredEntry::persistent(Stored::Str(delta.to_string()))),
                delta,
            )),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key, |_| Ok(()))?.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let expires_at = expiry_after(ttl);
        self.write(key, |slot| match slot {
            Some(entry) => {
                entry.expires_at = expires_at;
                Ok((None, true))
            }
            None => Ok((None, false)),
        })
    }

    async fn del(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let now = Instant::now();
        let removed = self.entries.remove(key);
        Ok(matches!(removed, Some((_, entry)) if !entry.is_expired(now)))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let remaining = self.read(key, |entry| {
            Ok(entry.expires_at.map(|at| at.saturating_duration_since(now)))
        })?;
        Ok(remaining.flatten())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.unavailable.load(Ordering::SeqCst))
    }
}
