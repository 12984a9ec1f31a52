//! Options accepted when opening a rotating writer

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rotatable_locks_file::{DEFAULT_STALE_TIMEOUT, DEFAULT_WAIT_TIMEOUT};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Default rotation threshold (100 MiB)
pub const DEFAULT_SIZE_THRESHOLD: u64 = 100 * 1024 * 1024;

const APPEND_FLAGS: &[&str] = &["a", "a+", "as", "as+"];

/// Options for a [`RotatingWriter`](crate::RotatingWriter)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotatingWriterOptions {
    /// Size in bytes at which the active file is rotated
    pub size_threshold: u64,

    /// Appended to every rotated filename
    pub suffix: Option<String>,

    /// Gzip rotated files
    pub compress: bool,

    /// Open flags in `fopen` notation; only append modes are accepted
    pub flags: Option<String>,

    /// Age after which a rotation lock left by a crashed writer is reclaimed
    pub lock_stale_timeout: Duration,

    /// How long to wait for the rotation lock before failing the write
    pub lock_wait_timeout: Duration,
}

impl Default for RotatingWriterOptions {
    fn default() -> Self {
        Self {
            size_threshold: DEFAULT_SIZE_THRESHOLD,
            suffix: None,
            compress: false,
            flags: None,
            lock_stale_timeout: DEFAULT_STALE_TIMEOUT,
            lock_wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl RotatingWriterOptions {
    /// Sets the threshold from a [`Size`].
    ///
    /// # Errors
    /// Returns a configuration error if the size string cannot be parsed.
    pub fn with_size(mut self, size: &Size) -> Result<Self> {
        self.size_threshold = size.bytes()?;
        Ok(self)
    }

    /// Checks the options without touching the filesystem.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if let Some(flags) = &self.flags {
            if !APPEND_FLAGS.contains(&flags.as_str()) {
                return Err(Error::Configuration(format!(
                    "writer must be opened in append mode, got flags `{flags}`"
                )));
            }
        }

        if self.size_threshold == 0 {
            return Err(Error::Configuration(
                "size threshold must be greater than zero".to_string(),
            ));
        }

        if let Some(suffix) = &self.suffix {
            if suffix.contains('/') || suffix.contains(std::path::MAIN_SEPARATOR) {
                return Err(Error::Configuration(format!(
                    "suffix `{suffix}` must not contain a path separator"
                )));
            }
        }

        if self.lock_wait_timeout.is_zero() {
            return Err(Error::Configuration(
                "lock wait timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// A size given either as a byte count or as a string like `"5gb"`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Size {
    /// Exact number of bytes
    Bytes(u64),
    /// Human readable size, see [`parse_size`]
    Human(String),
}

impl Size {
    /// Resolves to a byte count.
    ///
    /// # Errors
    /// Returns a configuration error if the string form cannot be parsed.
    pub fn bytes(&self) -> Result<u64> {
        match self {
            Self::Bytes(bytes) => Ok(*bytes),
            Self::Human(value) => parse_size(value),
        }
    }
}

impl FromStr for Size {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        parse_size(value).map(Self::Bytes)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "{bytes}"),
            Self::Human(value) => f.write_str(value),
        }
    }
}

/// Parses sizes such as `"100"`, `"1.5kb"`, `"10 MB"` or `"5gb"`.
///
/// Units are case-insensitive and use powers of 1024. A bare number is a
/// byte count. Fractional results are rounded down.
///
/// # Errors
/// Returns [`Error::Configuration`] for empty, negative, unknown-unit, or
/// overflowing inputs.
pub fn parse_size(value: &str) -> Result<u64> {
    let invalid = || Error::Configuration(format!("invalid size `{value}`"));

    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    if number.is_empty() {
        return Err(invalid());
    }

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1 << 10,
        "mb" => 1 << 20,
        "gb" => 1 << 30,
        "tb" => 1 << 40,
        "pb" => 1 << 50,
        _ => return Err(invalid()),
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier).ok_or_else(invalid);
    }

    let fractional: f64 = number.parse().map_err(|_| invalid())?;
    #[allow(clippy::cast_precision_loss)]
    let (scaled, limit) = (fractional * multiplier as f64, u64::MAX as f64);
    if !scaled.is_finite() || scaled >= limit {
        return Err(invalid());
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bytes = scaled.floor() as u64;
    Ok(bytes)
}
