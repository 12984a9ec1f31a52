//! Uploader that copies rotated files into a directory on local disk, for
//! local development and archiving to mounted volumes.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use rotatable_upload::Uploader;
use tokio::fs;
use tracing::debug;

/// Uploader writing into a directory tree.
#[derive(Clone, Debug)]
pub struct FsUploader {
    dir: PathBuf,
}

impl FsUploader {
    /// Creates a new `FsUploader` with the specified directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory uploads are copied into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn get_file_path(&self, key: &str) -> Result<PathBuf, Error> {
        let key_path = Path::new(key);
        let escapes = key_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));

        if key.is_empty() || escapes {
            return Err(Error::InvalidKey(key.to_string()));
        }

        Ok(self.dir.join(key_path))
    }
}

#[async_trait]
impl Uploader for FsUploader {
    type Error = Error;

    async fn upload(&self, path: &Path, key: &str) -> Result<String, Self::Error> {
        let destination = self.get_file_path(key)?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Io("error creating directory", e))?;
        }

        fs::copy(path, &destination)
            .await
            .map_err(|e| Error::Io("error copying file", e))?;

        debug!(from = %path.display(), to = %destination.display(), "copied artifact");

        Ok(destination.to_string_lossy().into_owned())
    }
}
