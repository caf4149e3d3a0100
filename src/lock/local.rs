//! In-process named locks.
//!
//! Same contract as the Redis lock, scoped to one process. Handles for the
//! same name share one `tokio::sync::Mutex`, which stays in the lock table
//! only while some handle for that name is alive.

use super::{DistributedLock, Interrupter, LockProvider};
use crate::error::{Error, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Arc<DashMap<String, Arc<AsyncMutex<()>>>>;

/// Hands out [`LocalLock`] handles. Clones share the same lock table.
#[derive(Clone, Default)]
pub struct LocalLockProvider {
    locks: LockTable,
    interrupter: Interrupter,
}

impl LocalLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lock names with at least one live handle.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl LockProvider for LocalLockProvider {
    type Lock = LocalLock;

    fn lock(&self, name: &str) -> LocalLock {
        let mutex = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        LocalLock {
            name: name.to_string(),
            mutex,
            table: self.locks.clone(),
            guard: Mutex::new(None),
            interrupter: self.interrupter.clone(),
        }
    }

    fn interrupter(&self) -> &Interrupter {
        &self.interrupter
    }
}

/// Handle on one in-process lock.
pub struct LocalLock {
    name: String,
    mutex: Arc<AsyncMutex<()>>,
    table: LockTable,
    guard: Mutex<Option<OwnedMutexGuard<()>>>,
    interrupter: Interrupter,
}

impl LocalLock {
    /// Drop the table entry if this handle is its last user.
    ///
    /// Only called on drop: a released handle may acquire again and must
    /// find the same mutex as every other handle for its name. The table
    /// holds one reference and this handle another; handles are created
    /// under the entry's shard lock, so none can appear during the check.
    fn prune(&self) {
        let removed = self
            .table
            .remove_if(&self.name, |_, mutex| {
                Arc::ptr_eq(mutex, &self.mutex) && Arc::strong_count(mutex) == 2
            })
            .is_some();
        if removed {
            debug!("Lock {} dropped from the lock table", self.name);
        }
    }
}

impl Drop for LocalLock {
    fn drop(&mut self) {
        // The guard holds its own reference to the mutex.
        drop(self.guard.get_mut().take());
        self.prune();
    }
}

impl DistributedLock for LocalLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(&self, wait: Option<Duration>) -> Result<bool> {
        if self.is_held() {
            return Ok(true);
        }

        let mut interruption = self.interrupter.subscribe();
        let acquire = self.mutex.clone().lock_owned();

        let guard = tokio::select! {
            guard = async move {
                match wait {
                    Some(wait) => tokio::time::timeout(wait, acquire).await.ok(),
                    None => Some(acquire.await),
                }
            } => guard,
            _ = interruption.interrupted() => {
                return Err(Error::LockInterrupted {
                    name: self.name.clone(),
                });
            }
        };

        match guard {
            Some(guard) => {
                *self.guard.lock() = Some(guard);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release(&self) -> Result<()> {
        match self.guard.lock().take() {
            Some(guard) => {
                drop(guard);
                Ok(())
            }
            None => Err(Error::LockNotHeld {
                name: self.name.clone(),
            }),
        }
    }

    fn is_held(&self) -> bool {
        self.guard.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockCoordinator;

    #[tokio::test(start_paused = true)]
    async fn test_second_handle_waits_for_release() {
        let provider = LocalLockProvider::new();
        let first = provider.lock("res");
        let second = provider.lock("res");

        assert!(first.try_acquire(None).await.unwrap());
        assert!(!second
            .try_acquire(Some(Duration::from_millis(20)))
            .await
            .unwrap());
        assert!(!second.is_held());

        first.release().await.unwrap();
        assert!(second
            .try_acquire(Some(Duration::from_millis(20)))
            .await
            .unwrap());
        second.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_different_names_are_independent() {
        let provider = LocalLockProvider::new();
        let a = provider.lock("a");
        let b = provider.lock("b");

        assert!(a.try_acquire(Some(Duration::ZERO)).await.unwrap());
        assert!(b.try_acquire(Some(Duration::ZERO)).await.unwrap());
        assert_eq!(provider.len(), 2);
    }

    #[tokio::test]
    async fn test_table_only_holds_names_with_live_handles() {
        let locks = LockCoordinator::new(LocalLockProvider::new());

        for i in 0..1_000 {
            locks
                .with_lock(&format!("order:{i}"), || async {})
                .await
                .unwrap();
        }
        assert!(locks.provider().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_survives_while_another_handle_waits() {
        let provider = LocalLockProvider::new();
        let holder = provider.lock("res");
        assert!(holder.try_acquire(None).await.unwrap());

        let contender = provider.lock("res");
        holder.release().await.unwrap();
        assert_eq!(provider.len(), 1);

        // The contender still excludes a third handle through the same mutex
        assert!(contender
            .try_acquire(Some(Duration::from_millis(10)))
            .await
            .unwrap());
        let third = provider.lock("res");
        assert!(!third
            .try_acquire(Some(Duration::from_millis(10)))
            .await
            .unwrap());

        drop(third);
        drop(holder);
        contender.release().await.unwrap();
        drop(contender);
        assert!(provider.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_handle_is_pruned_on_drop() {
        let provider = LocalLockProvider::new();
        let holder = provider.lock("res");
        assert!(holder.try_acquire(None).await.unwrap());

        let late = provider.lock("res");
        assert!(!late
            .try_acquire(Some(Duration::from_millis(5)))
            .await
            .unwrap());
        drop(late);
        assert_eq!(provider.len(), 1);

        holder.release().await.unwrap();
        drop(holder);
        assert!(provider.is_empty());
    }

    #[tokio::test]
    async fn test_release_without_holding() {
        let provider = LocalLockProvider::new();
        let lock = provider.lock("res");

        assert!(matches!(
            lock.release().await,
            Err(Error::LockNotHeld { ref name }) if name == "res"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_only_affects_current_waiters() {
        let provider = LocalLockProvider::new();
        let holder = provider.lock("res");
        assert!(holder.try_acquire(None).await.unwrap());

        let waiter = {
            let lock = provider.lock("res");
            tokio::spawn(async move {
                let result = lock.try_acquire(None).await;
                (result, lock.is_held())
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        provider.interrupter().interrupt();

        let (result, held) = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::LockInterrupted { .. })));
        assert!(!held);

        // A wait that starts after the interrupt is unaffected
        let late = provider.lock("res");
        assert!(!late
            .try_acquire(Some(Duration::from_millis(10)))
            .await
            .unwrap());
    }
}
