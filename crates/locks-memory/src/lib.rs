//! In-memory (single process) implementation of locks.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rotatable_locks::{LockManager, LockStatus};
use tokio::sync::Notify;
use tracing::trace;

static NEXT_HOLDER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct Shared {
    held: Mutex<HashMap<String, String>>,
    released: Notify,
}

/// In-memory lock manager.
///
/// Clones share both the lock table and the holder identity. Use
/// [`MemoryLockManager::peer`] to get a handle that competes for the same
/// locks under a different identity.
#[derive(Clone, Debug)]
pub struct MemoryLockManager {
    shared: Arc<Shared>,
    holder: String,
}

impl Default for MemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLockManager {
    /// Creates a new instance of `MemoryLockManager`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            holder: next_holder(),
        }
    }

    /// Creates a manager sharing this lock table with a distinct holder id.
    #[must_use]
    pub fn peer(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            holder: next_holder(),
        }
    }

    /// The holder id this manager records for the locks it takes.
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn acquire(&self, resource_id: &str) -> Option<MemoryLockGuard> {
        let mut held = self.shared.held.lock();
        if held.contains_key(resource_id) {
            return None;
        }
        held.insert(resource_id.to_string(), self.holder.clone());
        drop(held);

        trace!(resource_id, holder = %self.holder, "memory lock acquired");

        Some(MemoryLockGuard {
            shared: self.shared.clone(),
            resource_id: resource_id.to_string(),
        })
    }
}

fn next_holder() -> String {
    format!("memory-{}", NEXT_HOLDER.fetch_add(1, Ordering::Relaxed))
}

/// Guard for a lock taken through [`MemoryLockManager`]. Released on drop.
#[derive(Debug)]
pub struct MemoryLockGuard {
    shared: Arc<Shared>,
    resource_id: String,
}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        self.shared.held.lock().remove(&self.resource_id);
        self.shared.released.notify_waiters();
        trace!(resource_id = %self.resource_id, "memory lock released");
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    type Error = Error;
    type Guard = MemoryLockGuard;

    async fn check(&self, resource_id: String) -> Result<LockStatus, Self::Error> {
        if resource_id.is_empty() {
            return Err(Error::EmptyResourceId);
        }

        Ok(match self.shared.held.lock().get(&resource_id) {
            None => LockStatus::Free,
            Some(holder) if *holder == self.holder => LockStatus::HeldBySelf,
            Some(holder) => LockStatus::HeldByOther(holder.clone()),
        })
    }

    async fn lock(&self, resource_id: String) -> Result<Self::Guard, Self::Error> {
        if resource_id.is_empty() {
            return Err(Error::EmptyResourceId);
        }

        loop {
            let released = self.shared.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(guard) = self.acquire(&resource_id) {
                return Ok(guard);
            }

            released.await;
        }
    }

    async fn try_lock(&self, resource_id: String) -> Result<Option<Self::Guard>, Self::Error> {
        if resource_id.is_empty() {
            return Err(Error::EmptyResourceId);
        }

        Ok(self.acquire(&resource_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_acquire_and_release_lock() {
        let manager = MemoryLockManager::new();
        let key = "test_key".to_string();

        let guard = manager.lock(key.clone()).await.unwrap();
        assert_eq!(manager.check(key.clone()).await.unwrap(), LockStatus::HeldBySelf);

        drop(guard);
        assert_eq!(manager.check(key).await.unwrap(), LockStatus::Free);
    }

    #[tokio::test]
    async fn test_peer_sees_lock_as_held_by_other() {
        let manager = MemoryLockManager::new();
        let peer = manager.peer();
        let key = "test_key".to_string();

        let _guard = manager.lock(key.clone()).await.unwrap();

        assert_matches!(
            peer.check(key.clone()).await.unwrap(),
            LockStatus::HeldByOther(holder) if holder == manager.holder()
        );
        assert!(peer.try_lock(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_waits_for_release() {
        let manager = MemoryLockManager::new();
        let peer = manager.peer();
        let key = "test_key".to_string();

        let guard = manager.lock(key.clone()).await.unwrap();

        let waiter = tokio::spawn({
            let key = key.clone();
            async move { peer.lock(key).await.map(|_| ()) }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_resource_id_is_rejected() {
        let manager = MemoryLockManager::new();

        assert_matches!(manager.try_lock(String::new()).await, Err(Error::EmptyResourceId));
    }
}
