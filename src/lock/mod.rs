//! Named mutual exclusion guarding a computation.
//!
//! Locks are exposed as a capability ([`DistributedLock`]) handed out by a
//! [`LockProvider`]; application code goes through the scoped helpers on
//! [`LockCoordinator`], which always release what they acquire.
//!
//! Locks are not reentrant: acquiring a name the current task already
//! holds waits like any other contender.

use crate::error::{Error, Result};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[cfg(feature = "inmemory")]
pub mod local;
#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "inmemory")]
pub use local::{LocalLock, LocalLockProvider};
#[cfg(feature = "redis")]
pub use self::redis::{RedisLock, RedisLockProvider};

/// A handle on one named lock.
///
/// A handle holds the lock at most once; `release` gives it back.
pub trait DistributedLock: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Try to take the lock, waiting up to `wait` (`None`: no limit).
    ///
    /// Returns `Ok(false)` if the wait elapsed.
    ///
    /// # Errors
    /// - `Error::LockInterrupted` if the wait was interrupted; the lock is not held
    /// - store errors from the lock service
    fn try_acquire(&self, wait: Option<Duration>) -> impl Future<Output = Result<bool>> + Send;

    /// Give the lock back.
    ///
    /// # Errors
    /// Returns `Error::LockNotHeld` if this handle does not hold the lock
    fn release(&self) -> impl Future<Output = Result<()>> + Send;

    fn is_held(&self) -> bool;
}

/// Source of lock handles.
pub trait LockProvider: Send + Sync {
    type Lock: DistributedLock;

    /// A fresh handle on the lock called `name`.
    fn lock(&self, name: &str) -> Self::Lock;

    /// Interrupter shared by every handle of this provider.
    fn interrupter(&self) -> &Interrupter;
}

/// Aborts lock waits in progress.
///
/// Each call to [`interrupt`](Interrupter::interrupt) fails every wait that
/// started before it with `Error::LockInterrupted`; later waits are not
/// affected.
#[derive(Clone, Debug)]
pub struct Interrupter {
    generation: Arc<watch::Sender<u64>>,
}

impl Default for Interrupter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Interrupter {
            generation: Arc::new(tx),
        }
    }

    pub fn interrupt(&self) {
        self.generation.send_modify(|generation| *generation += 1);
        debug!("Lock waiters interrupted");
    }

    /// Subscribe before waiting; the returned receiver resolves on the next interrupt.
    pub fn subscribe(&self) -> Interruption {
        Interruption {
            rx: self.generation.subscribe(),
        }
    }
}

/// One waiter's view of an [`Interrupter`].
pub struct Interruption {
    rx: watch::Receiver<u64>,
}

impl Interruption {
    /// Resolve when an interrupt arrives. Never resolves otherwise.
    pub async fn interrupted(&mut self) {
        if self.rx.changed().await.is_err() {
            // Interrupter dropped: nothing can interrupt this wait any more.
            std::future::pending::<()>().await;
        }
    }
}

/// Runs actions under named locks, releasing on every exit path.
#[derive(Clone)]
pub struct LockCoordinator<P> {
    provider: P,
}

impl<P: LockProvider> LockCoordinator<P> {
    pub fn new(provider: P) -> Self {
        LockCoordinator { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Abort every lock wait currently in progress.
    ///
    /// The interrupter is shared by the whole provider: waits on every lock
    /// name are aborted, not just one name or one waiter. Held locks and
    /// waits started afterwards are unaffected.
    pub fn interrupt_waiters(&self) {
        self.provider.interrupter().interrupt();
    }

    /// Wait for `name` without a time limit, run `action`, release.
    ///
    /// The lock is released after `action` completes, whatever it returns,
    /// and also if `action` panics or this future is dropped mid-way.
    /// `action`'s output is returned untouched; a failed release is logged.
    ///
    /// # Errors
    /// Returns `Error::LockInterrupted` or a lock-service error if the lock
    /// could not be acquired; `action` does not run in that case
    pub async fn with_lock<T, F, Fut>(&self, name: &str, action: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.provider.lock(name);
        if !lock.try_acquire(None).await? {
            // An unbounded wait only ends by acquiring or failing.
            return Err(Error::LockInterrupted {
                name: name.to_string(),
            });
        }
        self.run_held(lock, action).await
    }

    /// Wait up to `wait` for `name`; run `action` only if acquired.
    ///
    /// # Errors
    /// - `Error::LockTimeout` if the lock was not acquired in time; `action`
    ///   does not run and nothing is released
    /// - `Error::LockInterrupted` or a lock-service error, as for [`with_lock`](Self::with_lock)
    pub async fn with_try_lock<T, F, Fut>(&self, name: &str, wait: Duration, action: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.provider.lock(name);
        if !lock.try_acquire(Some(wait)).await? {
            debug!("✗ Lock {} not acquired within {:?}", name, wait);
            return Err(Error::LockTimeout {
                name: name.to_string(),
                waited: wait,
            });
        }
        self.run_held(lock, action).await
    }

    async fn run_held<T, F, Fut>(&self, lock: P::Lock, action: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        debug!("✓ Lock {} acquired", lock.name());
        let held = HeldLock::new(lock);
        let output = AssertUnwindSafe(action()).catch_unwind().await;
        held.release().await;
        match output {
            Ok(output) => Ok(output),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Releases its lock when dropped unless released explicitly first.
struct HeldLock<L: DistributedLock> {
    lock: Option<L>,
}

impl<L: DistributedLock> HeldLock<L> {
    fn new(lock: L) -> Self {
        HeldLock { lock: Some(lock) }
    }

    async fn release(mut self) {
        if let Some(lock) = self.lock.take() {
            release_logged(&lock).await;
        }
    }
}

impl<L: DistributedLock> Drop for HeldLock<L> {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        // Reached when the guarded action is cancelled.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    release_logged(&lock).await;
                });
            }
            Err(_) => warn!(
                "⚠ Lock {} dropped outside a runtime; it stays held until it expires",
                lock.name()
            ),
        }
    }
}

async fn release_logged<L: DistributedLock>(lock: &L) {
    match lock.release().await {
        Ok(()) => debug!("✓ Lock {} released", lock.name()),
        Err(e) => warn!("⚠ Failed to release lock {}: {}", lock.name(), e),
    }
}
