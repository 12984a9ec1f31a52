//! Abstract interface for shipping rotated artifacts to remote storage.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::convert::Infallible;
use std::error::Error;
use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;

/// Marker trait for `Uploader` errors
pub trait UploaderError: Debug + Error + Send + Sync + 'static {}

impl UploaderError for Infallible {}

/// A trait representing a destination for rotated files.
///
/// # Associated Types
/// - `Error`: The error type returned when an upload fails.
///
/// # Required Methods
/// - `async fn upload(&self, path: &Path, key: &str) -> Result<String, Self::Error>`:
///   Stores the file at `path` under `key` and returns where it ended up.
#[async_trait]
pub trait Uploader: Clone + Send + Sync + 'static {
    /// The error type for upload operations.
    type Error: UploaderError;

    /// Uploads the local file at `path` under the relative `key`.
    ///
    /// Returns a human-readable location of the stored object (a URL or a
    /// path). The local file is left untouched.
    async fn upload(&self, path: &Path, key: &str) -> Result<String, Self::Error>;
}

/// Uploader used when uploading is disabled. It has no values, so an
/// `Option<NoUploader>` is always `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoUploader {}

#[async_trait]
impl Uploader for NoUploader {
    type Error = Infallible;

    async fn upload(&self, _path: &Path, _key: &str) -> Result<String, Self::Error> {
        match *self {}
    }
}
