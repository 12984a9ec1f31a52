//! Abstract interface for the mutual-exclusion locks taken around rotation.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;

/// Marker trait for `LockManager` errors
pub trait LockManagerError: Debug + Error + Send + Sync + 'static {}

/// Represents the current status of a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// The lock is free (or held by a holder that is considered abandoned).
    Free,

    /// The lock is held by another instance, identified by the String.
    HeldByOther(String),

    /// The lock is held by the current instance/manager.
    HeldBySelf,
}

/// A trait representing a lock manager with asynchronous operations.
///
/// Locks are represented by a guard type that releases the lock when dropped,
/// so every exit path out of a critical section gives the lock back.
#[async_trait]
pub trait LockManager: Clone + Send + Sync + 'static {
    /// The error type for lock operations.
    type Error: LockManagerError;

    /// The guard type that releases the lock on drop.
    type Guard: Send + Sync + 'static;

    /// Checks the status of a lock.
    ///
    /// # Arguments
    /// * `resource_id`: The unique identifier for the resource.
    async fn check(&self, resource_id: String) -> Result<LockStatus, Self::Error>;

    /// Attempts to acquire a lock, waiting until it becomes available.
    ///
    /// Implementations decide how long they are willing to wait; an
    /// implementation that gives up returns an error rather than a guard.
    ///
    /// # Arguments
    /// * `resource_id`: A unique identifier for the resource to be locked.
    async fn lock(&self, resource_id: String) -> Result<Self::Guard, Self::Error>;

    /// Attempts to acquire a lock without waiting.
    ///
    /// If the lock is acquired successfully, returns `Ok(Some(Guard))`.
    /// If the lock is currently held by another, returns `Ok(None)`.
    /// If an error occurs during the attempt, returns `Err(Self::Error)`.
    ///
    /// # Arguments
    /// * `resource_id`: A unique identifier for the resource to be locked.
    async fn try_lock(&self, resource_id: String) -> Result<Option<Self::Guard>, Self::Error>;
}
