//! Error types for the rotating writer

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

/// Result type for rotating writer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error coming from a pluggable lock manager or uploader.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error types that can occur while writing, rotating, or post-processing
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid options; raised before any file is touched
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error while probing, writing, renaming or reopening
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted
        context: &'static str,
        /// The underlying error
        source: io::Error,
    },

    /// The rotation lock could not be acquired
    #[error("Failed to acquire rotation lock: {0}")]
    Lock(#[source] BoxError),

    /// The target path kept disappearing while reopening
    #[error("{} kept disappearing after {attempts} reopen attempts", path.display())]
    ReopenLimit {
        /// The target path
        path: PathBuf,
        /// Number of reopen attempts made
        attempts: usize,
    },

    /// Compressing a rotated file failed
    #[error("Failed to compress {}: {source}", path.display())]
    Compress {
        /// The file being compressed
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// Uploading a rotated file failed
    #[error("Failed to upload {}: {source}", path.display())]
    Upload {
        /// The file being uploaded
        path: PathBuf,
        /// The uploader's error
        source: BoxError,
    },
}

/// Coarse classification of [`Error`], matching how each kind is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal at construction, never retried.
    Configuration,
    /// Fatal for the write or rotation in flight; the writer stays usable.
    TransientIo,
    /// Halts one artifact's pipeline; reported through notifications.
    PipelineStage,
}

impl Error {
    pub(crate) const fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io { context, source }
    }

    /// Classifies this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Io { .. } | Self::Lock(_) | Self::ReopenLimit { .. } => ErrorKind::TransientIo,
            Self::Compress { .. } | Self::Upload { .. } => ErrorKind::PipelineStage,
        }
    }
}
