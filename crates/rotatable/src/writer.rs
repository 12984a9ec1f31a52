//! Append-only writer that rotates its file once it crosses a size threshold

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use rotatable_locks::LockManager;
use rotatable_locks_file::{FileLockManager, FileLockOptions};
use rotatable_upload::{NoUploader, Uploader};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::RotatingWriterOptions;
use crate::coordinator::RotationState;
use crate::error::{Error, Result};
use crate::events::{EventSink, EventSubscriber};
use crate::identity::{self, IdentityCheck};
use crate::pipeline::PostRotatePipeline;
use crate::probe::{FileIdentity, Probe};

/// How many times a single write reopens the path before giving up.
pub const MAX_REOPEN_ATTEMPTS: usize = 3;

/// Extension of the marker file used as the rotation lock.
pub const LOCK_EXTENSION: &str = "lock";

/// An append-only file writer that renames its file aside once it reaches a
/// size threshold and hands the rotated file to a background pipeline.
///
/// Several writers, in this process or others, may target the same path;
/// rotation is coordinated through a lock derived from the path and each
/// writer notices when a peer has rotated the file under it.
#[derive(Debug)]
pub struct RotatingWriter<L = FileLockManager> {
    pub(crate) path: PathBuf,
    pub(crate) lock_path: PathBuf,
    pub(crate) lock_id: String,
    pub(crate) size_threshold: u64,
    pub(crate) suffix: Option<String>,
    pub(crate) lock_manager: L,
    pub(crate) file: Option<File>,
    pub(crate) identity: Option<FileIdentity>,
    pub(crate) bytes_written: u64,
    pub(crate) position: u64,
    pub(crate) state: RotationState,
    pub(crate) events: EventSink,
    pub(crate) pipeline: PostRotatePipeline,
}

/// Builder for a [`RotatingWriter`] with a custom uploader or lock manager.
#[derive(Debug)]
pub struct RotatingWriterBuilder<U = NoUploader, L = FileLockManager> {
    path: PathBuf,
    options: RotatingWriterOptions,
    uploader: Option<U>,
    lock_manager: L,
}

impl RotatingWriter {
    /// Opens a writer at `path` that rotates, and optionally compresses,
    /// but does not upload.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for invalid options (before any file
    /// is touched) or an I/O error if the file cannot be opened.
    pub async fn open(path: impl Into<PathBuf>, options: RotatingWriterOptions) -> Result<Self> {
        Self::builder(path, options).open().await
    }

    /// Starts building a writer. The rotation lock is a marker file using the
    /// lock timeouts from `options` unless replaced with
    /// [`RotatingWriterBuilder::lock_manager`].
    pub fn builder(path: impl Into<PathBuf>, options: RotatingWriterOptions) -> RotatingWriterBuilder {
        let lock_manager = FileLockManager::new(FileLockOptions {
            stale_timeout: options.lock_stale_timeout,
            wait_timeout: options.lock_wait_timeout,
            ..FileLockOptions::default()
        });

        RotatingWriterBuilder {
            path: path.into(),
            options,
            uploader: None,
            lock_manager,
        }
    }
}

impl<U: Uploader, L: LockManager> RotatingWriterBuilder<U, L> {
    /// Uploads every rotated (and, if enabled, compressed) file through
    /// `uploader`, deleting the local copy afterwards.
    pub fn uploader<V: Uploader>(self, uploader: V) -> RotatingWriterBuilder<V, L> {
        RotatingWriterBuilder {
            path: self.path,
            options: self.options,
            uploader: Some(uploader),
            lock_manager: self.lock_manager,
        }
    }

    /// Replaces the lock used around the rename. The lock timeouts in the
    /// options only apply to the default lock manager.
    pub fn lock_manager<M: LockManager>(self, lock_manager: M) -> RotatingWriterBuilder<U, M> {
        RotatingWriterBuilder {
            path: self.path,
            options: self.options,
            uploader: self.uploader,
            lock_manager,
        }
    }

    /// Validates the options, opens the file and starts the pipeline.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for invalid options (before any file
    /// is touched) or an I/O error if the file cannot be opened.
    pub async fn open(self) -> Result<RotatingWriter<L>> {
        self.options.validate()?;

        if self.path.as_os_str().is_empty() {
            return Err(Error::Configuration("path must not be empty".to_string()));
        }

        let compress = self.options.compress;
        let lock_path = lock_path_for(&self.path);
        let events = EventSink::new();
        let pipeline = PostRotatePipeline::spawn(compress, self.uploader, events.clone());

        let mut writer = RotatingWriter {
            lock_id: lock_path.to_string_lossy().into_owned(),
            lock_path,
            path: self.path,
            size_threshold: self.options.size_threshold,
            suffix: self.options.suffix,
            lock_manager: self.lock_manager,
            file: None,
            identity: None,
            bytes_written: 0,
            position: 0,
            state: RotationState::Writing,
            events,
            pipeline,
        };

        writer.reopen().await?;

        info!(
            path = %writer.path.display(),
            size_threshold = writer.size_threshold,
            compress,
            "opened rotating writer"
        );

        Ok(writer)
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(LOCK_EXTENSION);
    PathBuf::from(name)
}

impl<L: LockManager> RotatingWriter<L> {
    /// Appends `buf` to the active file, rotating first if the file has
    /// already reached the threshold and afterwards if this write made it so.
    ///
    /// Returns the number of bytes written, which is always `buf.len()`.
    ///
    /// # Errors
    /// Fails if the path cannot be probed or reopened, if a rotation required
    /// before the write fails (including lock timeouts), or if the write
    /// itself fails. The writer stays usable afterwards.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let probe = match self.ensure_current().await {
            Ok(probe) => probe,
            Err(e) => {
                self.transition(RotationState::Failed);
                return Err(e);
            }
        };

        self.transition(RotationState::CheckingThreshold);
        if probe.size >= self.size_threshold {
            self.rotate().await?;
        }

        self.transition(RotationState::Writing);
        let written = self.append(buf).await;
        if written.is_err() {
            self.transition(RotationState::Failed);
        }
        let size = written?;

        // Rotate right after the crossing write so a quiet writer does not sit
        // on an oversized file. Failures resurface on the next write.
        if size >= self.size_threshold {
            if let Err(e) = self.rotate().await {
                warn!(path = %self.path.display(), "rotation after write failed: {e}");
            } else {
                self.transition(RotationState::Writing);
            }
        }

        Ok(buf.len())
    }

    /// Flushes the active file.
    ///
    /// # Errors
    /// Returns the I/O error reported by the file.
    pub async fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()
                .await
                .map_err(|e| Error::io("error flushing file", e))?;
        }
        Ok(())
    }

    /// Flushes and closes the active file, then waits until every rotated
    /// file has been through the pipeline.
    ///
    /// # Errors
    /// Returns the error from the final flush. The pipeline is drained either way.
    pub async fn close(mut self) -> Result<()> {
        let flushed = self.flush().await;
        self.file = None;

        self.pipeline.shutdown().await;
        debug!(path = %self.path.display(), "closed rotating writer");

        flushed
    }

    /// Subscribes to lifecycle notifications sent from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscriber {
        self.events.subscribe()
    }

    /// Path being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the marker used as the rotation lock.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Identity of the file currently open.
    #[must_use]
    pub const fn identity(&self) -> Option<FileIdentity> {
        self.identity
    }

    /// Bytes written through this writer since the file was last (re)opened.
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write position relative to the last (re)open.
    ///
    /// The file is opened in append mode, so this always equals
    /// [`bytes_written`](Self::bytes_written).
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Rotation threshold in bytes.
    #[must_use]
    pub const fn size_threshold(&self) -> u64 {
        self.size_threshold
    }

    /// Current step of the write/rotation sequence.
    #[must_use]
    pub const fn state(&self) -> RotationState {
        self.state
    }

    /// Rotated files queued for, or going through, the pipeline.
    #[must_use]
    pub fn pending_artifacts(&self) -> usize {
        self.pipeline.pending()
    }

    /// Makes sure the open handle still refers to the file at the path,
    /// reopening a bounded number of times if it does not.
    async fn ensure_current(&mut self) -> Result<Probe> {
        self.reopen_until_current(|path, expected| async move { identity::check(&path, expected).await })
            .await
    }

    /// Reopens until `check` reports the handle as current, giving up after
    /// `MAX_REOPEN_ATTEMPTS` reopens.
    async fn reopen_until_current<F, Fut>(&mut self, mut check: F) -> Result<Probe>
    where
        F: FnMut(PathBuf, Option<FileIdentity>) -> Fut,
        Fut: Future<Output = Result<IdentityCheck>>,
    {
        let mut attempts = 0;

        loop {
            let outcome = check(self.path.clone(), self.identity).await?;

            if let IdentityCheck::Current(probe) = outcome {
                if self.file.is_some() {
                    return Ok(probe);
                }
            }

            if attempts == MAX_REOPEN_ATTEMPTS {
                return Err(Error::ReopenLimit {
                    path: self.path.clone(),
                    attempts,
                });
            }
            attempts += 1;

            debug!(path = %self.path.display(), attempt = attempts, check = ?outcome, "file changed underneath, reopening");
            self.reopen().await?;
        }
    }

    async fn append(&mut self, buf: &[u8]) -> Result<u64> {
        let Some(file) = self.file.as_mut() else {
            return Err(Error::io(
                "error writing file",
                io::Error::from(io::ErrorKind::NotConnected),
            ));
        };

        file.write_all(buf)
            .await
            .map_err(|e| Error::io("error writing file", e))?;
        file.flush()
            .await
            .map_err(|e| Error::io("error flushing file", e))?;

        let len = buf.len() as u64;
        self.bytes_written += len;
        self.position += len;

        let size = file
            .metadata()
            .await
            .map_err(|e| Error::io("error probing open file", e))?
            .len();

        Ok(size)
    }

    /// Closes the current handle and opens the path again in append mode.
    pub(crate) async fn reopen(&mut self) -> Result<()> {
        self.transition(RotationState::Reopening);

        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                warn!(path = %self.path.display(), "failed to flush file before reopening: {e}");
            }
        }
        self.identity = None;
        self.bytes_written = 0;
        self.position = 0;

        let opened = async {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| Error::io("error opening file", e))?;
            let metadata = file
                .metadata()
                .await
                .map_err(|e| Error::io("error probing opened file", e))?;
            Ok::<_, Error>((file, FileIdentity::from_metadata(&metadata)))
        }
        .await;

        let (file, identity) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                self.transition(RotationState::Failed);
                return Err(e);
            }
        };

        debug!(path = %self.path.display(), %identity, "opened active file");

        self.file = Some(file);
        self.identity = Some(identity);
        self.transition(RotationState::Writing);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use tempfile::tempdir;

    use crate::error::ErrorKind;

    fn options(size_threshold: u64) -> RotatingWriterOptions {
        RotatingWriterOptions {
            size_threshold,
            ..RotatingWriterOptions::default()
        }
    }

    #[test]
    fn test_lock_path_for() {
        assert_eq!(
            lock_path_for(Path::new("/var/log/app.log")),
            PathBuf::from("/var/log/app.log.lock")
        );
    }

    #[tokio::test]
    async fn test_open_creates_file_and_records_identity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");

        let writer = RotatingWriter::open(&path, options(100)).await.unwrap();

        assert!(path.exists());
        assert!(writer.identity().is_some());
        assert_eq!(writer.state(), RotationState::Writing);
        assert_eq!(writer.lock_path(), dir.path().join("app.log.lock"));
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_rejects_write_flags_before_io() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");

        let err = RotatingWriter::open(
            &path,
            RotatingWriterOptions {
                flags: Some("w".to_string()),
                ..options(1000)
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_open_rejects_empty_path() {
        assert_matches!(
            RotatingWriter::open("", options(100)).await,
            Err(Error::Configuration(_))
        );
    }

    #[tokio::test]
    async fn test_counters_track_writes_and_reset_on_rotation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut writer = RotatingWriter::open(&path, options(10)).await.unwrap();

        writer.write(b"abcd").await.unwrap();
        assert_eq!(writer.bytes_written(), 4);
        assert_eq!(writer.position(), writer.bytes_written());

        writer.write(b"efghijkl").await.unwrap();
        assert_eq!(writer.bytes_written(), 0);
        assert_eq!(writer.position(), writer.bytes_written());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_gives_up_when_file_never_settles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut writer = RotatingWriter::open(&path, options(1024)).await.unwrap();

        let mut calls = 0;
        let result = writer
            .reopen_until_current(|_, _| {
                calls += 1;
                async { Ok(IdentityCheck::Missing) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert_matches!(err, Error::ReopenLimit { attempts: 3, .. });
        assert_eq!(calls, MAX_REOPEN_ATTEMPTS + 1);
    }

    #[tokio::test]
    async fn test_write_reopens_after_external_delete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut writer = RotatingWriter::open(&path, options(1000)).await.unwrap();

        writer.write(b"before\n").await.unwrap();
        let before = writer.identity();
        // Keeps the deleted inode allocated so the new file cannot reuse it.
        let _old = std::fs::File::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        writer.write(b"after\n").await.unwrap();

        assert_ne!(writer.identity(), before);
        assert_eq!(
            writer.identity(),
            crate::probe::probe(&path).await.unwrap().map(|p| p.identity)
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "after\n");
        writer.close().await.unwrap();
    }
}
