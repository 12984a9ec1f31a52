//! Serialized compress → upload → delete processing of rotated files
//!
//! Each writer owns one pipeline: a single worker task fed through a FIFO
//! channel, so at most one artifact is in flight per writer and artifacts
//! are handled in rotation order. Writes to the active file never wait on it.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rotatable_upload::Uploader;
use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::artifact::{ArtifactStage, RotatedArtifact, compressed_path};
use crate::compress::{SETTLE_DELAY, gzip};
use crate::error::Error;
use crate::events::{EventSink, EventStage, RotationEvent};

pub(crate) struct PostRotatePipeline {
    sender: mpsc::UnboundedSender<RotatedArtifact>,
    pending: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
}

impl PostRotatePipeline {
    pub(crate) fn spawn<U: Uploader>(compress: bool, uploader: Option<U>, events: EventSink) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = PipelineWorker {
            compress,
            uploader,
            events,
            pending: pending.clone(),
        };

        Self {
            sender,
            pending,
            worker: tokio::spawn(worker.run(receiver)),
        }
    }

    /// Queues an artifact. Starts immediately if nothing else is in flight.
    pub(crate) fn enqueue(&self, artifact: RotatedArtifact) {
        self.pending.fetch_add(1, Ordering::SeqCst);

        if let Err(mpsc::error::SendError(artifact)) = self.sender.send(artifact) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            error!(
                path = %artifact.renamed_path.display(),
                "post-rotation pipeline is gone, leaving rotated file in place"
            );
        }
    }

    /// Artifacts queued or in flight.
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stops accepting work and waits for everything queued to finish.
    pub(crate) async fn shutdown(self) {
        drop(self.sender);

        if let Err(e) = self.worker.await {
            error!("post-rotation pipeline worker failed: {e}");
        }
    }
}

impl fmt::Debug for PostRotatePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostRotatePipeline")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

struct PipelineWorker<U> {
    compress: bool,
    uploader: Option<U>,
    events: EventSink,
    pending: Arc<AtomicUsize>,
}

impl<U: Uploader> PipelineWorker<U> {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<RotatedArtifact>) {
        while let Some(artifact) = receiver.recv().await {
            let artifact = self.process(artifact).await;

            debug!(
                path = %artifact.current_path.display(),
                stage = ?artifact.stage,
                "post-rotation pipeline finished artifact"
            );

            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn process(&self, mut artifact: RotatedArtifact) -> RotatedArtifact {
        if self.compress && !self.compress_stage(&mut artifact).await {
            return artifact;
        }

        if let Some(uploader) = &self.uploader {
            self.upload_stage(uploader, &mut artifact).await;
        }

        artifact
    }

    async fn compress_stage(&self, artifact: &mut RotatedArtifact) -> bool {
        let path = artifact.current_path.clone();

        self.events.emit(RotationEvent::CompressStarted {
            path: path.clone(),
            gz_path: compressed_path(&path),
        });

        let gz_path = match gzip(&path).await {
            Ok(gz_path) => gz_path,
            Err(e) => {
                self.events.error(EventStage::Compress, &path, &e);
                return false;
            }
        };

        self.events.emit(RotationEvent::Compressed {
            path: path.clone(),
            gz_path: gz_path.clone(),
        });

        artifact.current_path = gz_path;
        artifact.stage = ArtifactStage::Compressed;

        // The archive is complete, so a failed delete only leaves a duplicate.
        self.delete(&path).await;

        true
    }

    async fn upload_stage(&self, uploader: &U, artifact: &mut RotatedArtifact) {
        let path = artifact.current_path.clone();
        let key = artifact.upload_key();

        self.events.emit(RotationEvent::UploadStarted {
            path: path.clone(),
            key: key.clone(),
        });

        let location = match Self::upload_settled(uploader, &path, &key).await {
            Ok(location) => location,
            Err(err) => {
                warn!(path = %path.display(), "keeping local file after failed upload");
                self.events.error(EventStage::Upload, &path, &err);
                return;
            }
        };

        self.events.emit(RotationEvent::Uploaded {
            path: path.clone(),
            key,
            location,
        });
        artifact.stage = ArtifactStage::Uploaded;

        if self.delete(&path).await {
            artifact.stage = ArtifactStage::Deleted;
        }
    }

    /// Uploads `path`, then uploads it again under the same key for as long
    /// as it keeps growing across [`SETTLE_DELAY`].
    async fn upload_settled(uploader: &U, path: &Path, key: &str) -> Result<String, Error> {
        let mut uploaded = file_len(path).await;

        loop {
            let location = uploader.upload(path, key).await.map_err(|e| Error::Upload {
                path: path.to_path_buf(),
                source: Box::new(e),
            })?;

            tokio::time::sleep(SETTLE_DELAY).await;
            let now = file_len(path).await;
            if now == uploaded {
                return Ok(location);
            }

            debug!(path = %path.display(), ?uploaded, ?now, "file grew during upload, uploading again");
            uploaded = now;
        }
    }

    async fn delete(&self, path: &Path) -> bool {
        self.events.emit(RotationEvent::DeleteStarted {
            path: path.to_path_buf(),
        });

        match fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "file already gone");
            }
            Err(e) => {
                let err = Error::io("error deleting file", e);
                self.events.error(EventStage::Delete, path, &err);
                return false;
            }
        }

        self.events.emit(RotationEvent::Deleted {
            path: path.to_path_buf(),
        });
        true
    }
}

async fn file_len(path: &Path) -> Option<u64> {
    fs::metadata(path).await.ok().map(|m| m.len())
}
