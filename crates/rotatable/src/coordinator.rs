//! Rotation sequence: decide, lock, verify, rename, reopen
//!
//! The rename is the only step that needs cross-process exclusion. After the
//! lock is taken the path is probed again, because a peer may have rotated
//! while this writer was waiting; in that case the writer just reopens.

use std::fmt;
use std::io;
use std::path::Path;

use chrono::Utc;
use rotatable_locks::LockManager;
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::artifact::{RotatedArtifact, rotated_path};
use crate::error::{Error, Result};
use crate::events::{EventStage, RotationEvent};
use crate::identity::{self, IdentityCheck};
use crate::writer::RotatingWriter;

/// Where a writer is in the write/rotation sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationState {
    /// Idle or appending to the active file
    Writing,
    /// Comparing the probed size with the threshold
    CheckingThreshold,
    /// Waiting for the rotation lock
    Locking,
    /// Lock held, re-probing the path
    VerifyingOwnership,
    /// Renaming the active file aside
    Renaming,
    /// Opening a fresh file at the path
    Reopening,
    /// The last write or rotation attempt failed
    Failed,
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Writing => "writing",
            Self::CheckingThreshold => "checking-threshold",
            Self::Locking => "locking",
            Self::VerifyingOwnership => "verifying-ownership",
            Self::Renaming => "renaming",
            Self::Reopening => "reopening",
            Self::Failed => "failed",
        })
    }
}

/// Renames `from` to `to`. Returns `Ok(false)` when `from` no longer exists,
/// which means a peer got there first.
pub(crate) async fn rename_tolerant(from: &Path, to: &Path) -> Result<bool> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(path = %from.display(), "file vanished before rename, assuming a peer rotated it");
            Ok(false)
        }
        Err(e) => Err(Error::io("error renaming file", e)),
    }
}

impl<L: LockManager> RotatingWriter<L> {
    pub(crate) fn transition(&mut self, next: RotationState) {
        if self.state != next {
            trace!(path = %self.path.display(), from = %self.state, to = %next, "state change");
            self.state = next;
        }
    }

    /// Runs the rotation sequence once. On failure the writer is left in
    /// [`RotationState::Failed`] and an error notification is sent.
    pub(crate) async fn rotate(&mut self) -> Result<()> {
        match self.rotate_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.transition(RotationState::Failed);
                self.events.error(EventStage::Rotate, &self.path, &e);
                Err(e)
            }
        }
    }

    async fn rotate_inner(&mut self) -> Result<()> {
        self.transition(RotationState::Locking);
        let guard = self
            .lock_manager
            .lock(self.lock_id.clone())
            .await
            .map_err(|e| Error::Lock(Box::new(e)))?;

        self.transition(RotationState::VerifyingOwnership);
        match identity::check(&self.path, self.identity).await? {
            IdentityCheck::Current(probe) if probe.size >= self.size_threshold => {}
            IdentityCheck::Current(probe) => {
                drop(guard);
                debug!(path = %self.path.display(), size = probe.size, "below threshold once locked, not rotating");
                return Ok(());
            }
            other => {
                drop(guard);
                debug!(path = %self.path.display(), check = ?other, "already rotated by a peer");
                return self.reopen().await;
            }
        }

        self.transition(RotationState::Renaming);
        let rotated_at = Utc::now();
        let target = rotated_path(&self.path, rotated_at, self.suffix.as_deref());

        self.events.emit(RotationEvent::RotateStarted {
            from: self.path.clone(),
            to: target.clone(),
        });

        let renamed = rename_tolerant(&self.path, &target).await;
        drop(guard);
        let renamed = renamed?;

        let reopened = self.reopen().await;

        if renamed {
            self.events.emit(RotationEvent::Rotated {
                from: self.path.clone(),
                to: target.clone(),
            });
            self.pipeline
                .enqueue(RotatedArtifact::new(self.path.clone(), target, rotated_at));
        }

        reopened
    }
}
