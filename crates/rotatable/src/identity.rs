//! Detects when the path no longer refers to the file a writer has open

use std::path::Path;

use crate::error::Result;
use crate::probe::{FileIdentity, Probe, probe};

/// Outcome of comparing a remembered identity against the path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityCheck {
    /// The path still refers to the remembered file.
    Current(Probe),
    /// Nothing exists at the path (rotated away or deleted).
    Missing,
    /// The path now refers to a different file.
    Replaced {
        /// Identity the writer remembered, if it had one
        expected: Option<FileIdentity>,
        /// What the path refers to now
        found: Probe,
    },
}

impl IdentityCheck {
    /// Whether the writer has to reopen before it may write.
    #[must_use]
    pub const fn must_reopen(&self) -> bool {
        !matches!(self, Self::Current(_))
    }
}

/// Probes `path` and compares the result with `expected`.
pub async fn check(path: &Path, expected: Option<FileIdentity>) -> Result<IdentityCheck> {
    Ok(match probe(path).await? {
        None => IdentityCheck::Missing,
        Some(found) if Some(found.identity) == expected => IdentityCheck::Current(found),
        Some(found) => IdentityCheck::Replaced { expected, found },
    })
}
