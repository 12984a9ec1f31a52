//! Size and identity of the file currently behind a path

use std::fmt;
use std::fs::Metadata;
use std::io;
use std::path::Path;

use tokio::fs;

use crate::error::{Error, Result};

/// Stable on-disk identity of a file (device and inode on unix).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    /// Device the file lives on
    pub dev: u64,
    /// Inode number
    pub ino: u64,
}

impl FileIdentity {
    /// Reads the identity out of file metadata.
    #[cfg(unix)]
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            dev: metadata.dev(),
            ino: metadata.ino(),
        }
    }

    /// Reads the identity out of file metadata.
    ///
    /// Without inode numbers the creation time stands in for the identity,
    /// which still changes whenever the path is recreated.
    #[cfg(not(unix))]
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let created = metadata
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| {
                u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
            });

        Self {
            dev: 0,
            ino: created,
        }
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// Result of probing a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Probe {
    /// Current size in bytes
    pub size: u64,
    /// Identity of the file the path resolves to
    pub identity: FileIdentity,
}

impl Probe {
    /// Builds a probe from already fetched metadata.
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            identity: FileIdentity::from_metadata(metadata),
        }
    }
}

/// Probes `path`. Returns `Ok(None)` when nothing exists there; every other
/// failure is returned as an error.
pub async fn probe(path: &Path) -> Result<Option<Probe>> {
    match fs::metadata(path).await {
        Ok(metadata) => Ok(Some(Probe::from_metadata(&metadata))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io("error probing file", e)),
    }
}
