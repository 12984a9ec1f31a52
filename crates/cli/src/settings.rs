//! Command-line flags merged over an optional TOML config file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rotatable::{RotatingWriterOptions, Size};
use rotatable_upload_s3::S3Target;
use serde::Deserialize;
use url::Url;

use crate::Error;

/// Table read from the config file, e.g.
///
/// ```toml
/// [rotatable]
/// size = "10mb"
/// gzip = true
/// upload = "s3://logs-bucket/app"
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub size: Option<Size>,
    pub suffix: Option<String>,
    pub gzip: Option<bool>,
    pub upload: Option<String>,
    pub lock_stale_timeout_secs: Option<u64>,
    pub lock_wait_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path, key: &str) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Io("error reading config file", e))?;
        Self::parse(&contents, key)
    }

    /// Picks the `key` table out of a TOML document.
    pub fn parse(contents: &str, key: &str) -> Result<Self, Error> {
        let mut document: toml::Table = contents.parse()?;

        match document.remove(key) {
            Some(table) => Ok(table.try_into::<Self>()?),
            None => Err(Error::Config(format!("no `[{key}]` table in config file"))),
        }
    }
}

/// Where rotated files go after compression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadTarget {
    /// `s3://[accessKey:secretKey@]bucket/prefix`
    S3(S3Target),
    /// `file:///some/dir`
    Dir(PathBuf),
}

impl FromStr for UploadTarget {
    type Err = Error;

    fn from_str(target: &str) -> Result<Self, Error> {
        if target.starts_with("s3://") {
            return Ok(Self::S3(target.parse()?));
        }

        let url = Url::parse(target)
            .map_err(|e| Error::Config(format!("invalid upload target `{target}`: {e}")))?;

        if url.scheme() != "file" {
            return Err(Error::Config(format!(
                "unsupported upload target scheme `{}`",
                url.scheme()
            )));
        }

        url.to_file_path()
            .map(Self::Dir)
            .map_err(|()| Error::Config(format!("invalid upload directory `{target}`")))
    }
}

/// Values given on the command line. `None`/`false` means "not given".
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub size: Option<Size>,
    pub suffix: Option<String>,
    pub gzip: bool,
    pub upload: Option<String>,
}

/// Everything needed to open the writer.
#[derive(Clone, Debug)]
pub struct Settings {
    pub options: RotatingWriterOptions,
    pub upload: Option<UploadTarget>,
}

impl Settings {
    pub fn merge(overrides: Overrides, file: FileConfig) -> Result<Self, Error> {
        let mut options = RotatingWriterOptions::default();

        if let Some(size) = overrides.size.or(file.size) {
            options = options.with_size(&size)?;
        }
        options.suffix = overrides.suffix.or(file.suffix);
        options.compress = overrides.gzip || file.gzip.unwrap_or(false);

        if let Some(secs) = file.lock_stale_timeout_secs {
            options.lock_stale_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.lock_wait_timeout_secs {
            options.lock_wait_timeout = Duration::from_secs(secs);
        }

        options.validate()?;

        let upload = overrides
            .upload
            .or(file.upload)
            .map(|target| target.parse())
            .transpose()?;

        Ok(Self { options, upload })
    }
}
