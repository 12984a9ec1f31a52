//! Rotated files and how they are named

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Extension added by the compression stage.
pub const COMPRESSED_EXTENSION: &str = "gz";

/// Where a rotated file is in the post-rotation pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArtifactStage {
    /// Renamed aside, untouched since
    Renamed,
    /// Gzipped; `current_path` points at the `.gz` file
    Compressed,
    /// Copied to remote storage
    Uploaded,
    /// Removed locally after upload
    Deleted,
}

/// One rotated file moving through the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotatedArtifact {
    /// Path the file was written under
    pub original_path: PathBuf,
    /// Path it was renamed to
    pub renamed_path: PathBuf,
    /// Path valid at the current stage
    pub current_path: PathBuf,
    /// Current stage
    pub stage: ArtifactStage,
    /// When the rename happened
    pub rotated_at: DateTime<Utc>,
}

impl RotatedArtifact {
    pub(crate) fn new(original_path: PathBuf, renamed_path: PathBuf, rotated_at: DateTime<Utc>) -> Self {
        Self {
            original_path,
            current_path: renamed_path.clone(),
            renamed_path,
            stage: ArtifactStage::Renamed,
            rotated_at,
        }
    }

    /// Remote key for the file at its current stage: the rotation date, then
    /// the file name.
    #[must_use]
    pub fn upload_key(&self) -> String {
        let file_name = self
            .current_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        format!("{}/{file_name}", self.rotated_at.format(DATE_FORMAT))
    }
}

/// Name a file at `path` gets when rotated at `rotated_at`:
/// `<path>.<timestamp>-<random><suffix>`.
///
/// The random component keeps two writers that rotate within the same
/// millisecond from picking the same name.
pub fn rotated_path(path: &Path, rotated_at: DateTime<Utc>, suffix: Option<&str>) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(
        ".{}-{:08x}{}",
        rotated_at.format(TIMESTAMP_FORMAT),
        rand::random::<u32>(),
        suffix.unwrap_or_default()
    ));
    PathBuf::from(name)
}

/// Sibling path produced by compressing `path`.
pub fn compressed_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(COMPRESSED_EXTENSION);
    PathBuf::from(name)
}
