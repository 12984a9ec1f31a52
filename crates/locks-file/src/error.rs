use std::path::PathBuf;
use std::time::Duration;

use rotatable_locks::LockManagerError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// IO operation on the lock marker failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// The lock could not be acquired within the configured wait timeout.
    #[error("timed out after {waited:?} waiting for lock {}", path.display())]
    Timeout {
        /// Marker path of the contended lock.
        path: PathBuf,
        /// How long acquisition was attempted.
        waited: Duration,
    },
}

impl LockManagerError for Error {}
