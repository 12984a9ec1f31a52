//! Size-triggered log file rotation that is safe across processes
//!
//! A [`RotatingWriter`] appends to a file and, once that file reaches a size
//! threshold, renames it aside and starts a fresh one at the same path. The
//! rotated file is then gzipped, uploaded, and deleted by a per-writer
//! background pipeline while writes continue.
//!
//! - Multiple writers (in one or many processes) may share a path; renames
//!   are serialized through a lock file next to the target
//! - A writer that finds its file rotated or deleted by someone else reopens
//!   the path instead of rotating again
//! - Lifecycle notifications are available through [`RotatingWriter::subscribe`]

#![warn(missing_docs, unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod artifact;
mod compress;
mod config;
mod coordinator;
mod error;
mod events;
mod identity;
mod pipeline;
mod probe;
mod writer;

pub use artifact::{ArtifactStage, COMPRESSED_EXTENSION, RotatedArtifact, compressed_path, rotated_path};
pub use compress::gzip;
pub use config::{DEFAULT_SIZE_THRESHOLD, RotatingWriterOptions, Size, parse_size};
pub use coordinator::RotationState;
pub use error::{BoxError, Error, ErrorKind, Result};
pub use events::{EventStage, EventSubscriber, RotationEvent};
pub use identity::{IdentityCheck, check as check_identity};
pub use probe::{FileIdentity, Probe, probe};
pub use writer::{LOCK_EXTENSION, MAX_REOPEN_ATTEMPTS, RotatingWriter, RotatingWriterBuilder};

pub use rotatable_locks::{LockManager, LockStatus};
pub use rotatable_locks_file::{FileLockManager, FileLockOptions};
pub use rotatable_upload::{NoUploader, Uploader};
