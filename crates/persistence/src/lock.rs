//! Named mutual-exclusion locks.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::LockError;

/// Exclusive locks keyed by an arbitrary name.
///
/// Two holders of the same name are fully serialized; different names never
/// contend. Dropping a guard releases the lock, so release happens even when
/// the holder errors, panics or is cancelled. [`Locker::release`] is the
/// orderly path and may report backend failures.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Proof of ownership of a named lock.
    type Guard: Send;

    /// Waits until the lock named `name` is held by the caller.
    async fn acquire(&self, name: &str) -> Result<Self::Guard, LockError>;

    /// Releases a lock obtained from [`Locker::acquire`].
    async fn release(&self, guard: Self::Guard) -> Result<(), LockError>;
}

/// In-process named locks for single-instance deployments and tests.
///
/// The registry only keeps weak references, so names nobody holds or waits
/// for are pruned.
#[derive(Clone, Default)]
pub struct InMemoryLocker {
    locks: Arc<Mutex<HashMap<String, Weak<Mutex<()>>>>>,
}

/// Guard for a lock held through [`InMemoryLocker`].
pub struct InMemoryLockGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl InMemoryLockGuard {
    /// Returns the lock name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl InMemoryLocker {
    /// Creates an empty lock registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if some caller currently holds the lock.
    pub async fn is_locked(&self, name: &str) -> bool {
        let locks = self.locks.lock().await;
        locks
            .get(name)
            .and_then(Weak::upgrade)
            .is_some_and(|lock| lock.try_lock().map(drop).is_err())
    }

    /// Returns the number of names currently tracked.
    pub async fn tracked_names(&self) -> usize {
        let locks = self.locks.lock().await;
        locks.values().filter(|lock| lock.strong_count() > 0).count()
    }

    async fn entry(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = locks.get(name).and_then(Weak::upgrade) {
            return lock;
        }

        let lock = Arc::new(Mutex::new(()));
        locks.insert(name.to_string(), Arc::downgrade(&lock));
        lock
    }
}

#[async_trait]
impl Locker for InMemoryLocker {
    type Guard = InMemoryLockGuard;

    async fn acquire(&self, name: &str) -> Result<InMemoryLockGuard, LockError> {
        let lock = self.entry(name).await;
        let guard = lock.lock_owned().await;
        Ok(InMemoryLockGuard {
            name: name.to_string(),
            _guard: guard,
        })
    }

    async fn release(&self, guard: InMemoryLockGuard) -> Result<(), LockError> {
        drop(guard);
        Ok(())
    }
}
