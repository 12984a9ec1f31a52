use rotatable_locks::LockManagerError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The resource identifier was empty.
    #[error("lock resource id must not be empty")]
    EmptyResourceId,
}

impl LockManagerError for Error {}
