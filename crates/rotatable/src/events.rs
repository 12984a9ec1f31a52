//! Lifecycle notifications for observers of a rotating writer
//!
//! Every notification is also logged through `tracing`, so a writer without
//! subscribers still leaves a trail of what it did.

use std::fmt;
use std::path::PathBuf;

use tokio::sync::broadcast;
use tracing::{debug, error, info};

const EVENT_CAPACITY: usize = 256;

/// Which step an error notification is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventStage {
    /// Renaming the active file aside
    Rotate,
    /// Gzipping a rotated file
    Compress,
    /// Uploading a rotated file
    Upload,
    /// Removing a local file after a successful stage
    Delete,
}

impl fmt::Display for EventStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rotate => "rotate",
            Self::Compress => "compress",
            Self::Upload => "upload",
            Self::Delete => "delete",
        })
    }
}

/// Notifications emitted by a writer and its post-rotation pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RotationEvent {
    /// About to rename `from` to `to`
    RotateStarted {
        /// Active path
        from: PathBuf,
        /// Rotated path
        to: PathBuf,
    },
    /// `from` was renamed to `to` and a fresh file opened at `from`
    Rotated {
        /// Active path
        from: PathBuf,
        /// Rotated path
        to: PathBuf,
    },
    /// About to gzip `path` into `gz_path`
    CompressStarted {
        /// Source file
        path: PathBuf,
        /// Destination file
        gz_path: PathBuf,
    },
    /// `path` was gzipped into `gz_path`
    Compressed {
        /// Source file
        path: PathBuf,
        /// Destination file
        gz_path: PathBuf,
    },
    /// About to upload `path` under `key`
    UploadStarted {
        /// Local file
        path: PathBuf,
        /// Remote key
        key: String,
    },
    /// `path` was uploaded; `location` is where it landed
    Uploaded {
        /// Local file
        path: PathBuf,
        /// Remote key
        key: String,
        /// Location reported by the uploader
        location: String,
    },
    /// About to delete `path`
    DeleteStarted {
        /// File being deleted
        path: PathBuf,
    },
    /// `path` was deleted
    Deleted {
        /// File that was deleted
        path: PathBuf,
    },
    /// A step failed
    Error {
        /// Step that failed
        stage: EventStage,
        /// File the step was working on
        path: PathBuf,
        /// Rendered cause
        message: String,
    },
}

impl RotationEvent {
    /// Short kebab-case name of the notification, e.g. `rotate-started`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RotateStarted { .. } => "rotate-started",
            Self::Rotated { .. } => "rotated",
            Self::CompressStarted { .. } => "compress-started",
            Self::Compressed { .. } => "compressed",
            Self::UploadStarted { .. } => "upload-started",
            Self::Uploaded { .. } => "uploaded",
            Self::DeleteStarted { .. } => "delete-started",
            Self::Deleted { .. } => "deleted",
            Self::Error { .. } => "error",
        }
    }
}

/// Sending half held by the writer and its pipeline.
#[derive(Clone, Debug)]
pub(crate) struct EventSink {
    sender: broadcast::Sender<RotationEvent>,
}

impl EventSink {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    pub(crate) fn emit(&self, event: RotationEvent) {
        log_event(&event);
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub(crate) fn error(&self, stage: EventStage, path: impl Into<PathBuf>, err: &dyn fmt::Display) {
        self.emit(RotationEvent::Error {
            stage,
            path: path.into(),
            message: err.to_string(),
        });
    }
}

fn log_event(event: &RotationEvent) {
    match event {
        RotationEvent::RotateStarted { from, to } => {
            debug!(from = %from.display(), to = %to.display(), "rotating");
        }
        RotationEvent::Rotated { from, to } => {
            info!(from = %from.display(), to = %to.display(), "rotated");
        }
        RotationEvent::CompressStarted { path, gz_path } => {
            debug!(path = %path.display(), gz_path = %gz_path.display(), "compressing");
        }
        RotationEvent::Compressed { path, gz_path } => {
            info!(path = %path.display(), gz_path = %gz_path.display(), "compressed");
        }
        RotationEvent::UploadStarted { path, key } => {
            debug!(path = %path.display(), key, "uploading");
        }
        RotationEvent::Uploaded {
            path,
            key,
            location,
        } => {
            info!(path = %path.display(), key, location, "uploaded");
        }
        RotationEvent::DeleteStarted { path } => {
            debug!(path = %path.display(), "deleting");
        }
        RotationEvent::Deleted { path } => {
            debug!(path = %path.display(), "deleted");
        }
        RotationEvent::Error {
            stage,
            path,
            message,
        } => {
            error!(%stage, path = %path.display(), "{message}");
        }
    }
}

/// Receiving half handed out by [`RotatingWriter::subscribe`](crate::RotatingWriter::subscribe).
///
/// Only notifications sent after subscribing are seen. A subscriber that
/// falls more than a few hundred notifications behind skips the oldest ones.
#[derive(Debug)]
pub struct EventSubscriber {
    receiver: broadcast::Receiver<RotationEvent>,
}

impl EventSubscriber {
    /// Receive the next notification. Returns `None` once the writer and its
    /// pipeline are gone and everything buffered has been read.
    pub async fn recv(&mut self) -> Option<RotationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive without blocking
    pub fn try_recv(&mut self) -> Option<RotationEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drains every notification that is currently buffered.
    pub fn drain(&mut self) -> Vec<RotationEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_emit_reaches_subscribers_and_logs() {
        let sink = EventSink::new();
        let mut subscriber = sink.subscribe();

        sink.emit(RotationEvent::Rotated {
            from: PathBuf::from("app.log"),
            to: PathBuf::from("app.log.1"),
        });

        assert_eq!(
            subscriber.recv().await,
            Some(RotationEvent::Rotated {
                from: PathBuf::from("app.log"),
                to: PathBuf::from("app.log.1"),
            })
        );
        assert!(logs_contain("rotated"));
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let sink = EventSink::new();

        sink.error(EventStage::Upload, "app.log.1", &"network down");

        let mut late = sink.subscribe();
        assert_eq!(late.try_recv(), None);
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_sink_dropped() {
        let sink = EventSink::new();
        let mut subscriber = sink.subscribe();

        sink.emit(RotationEvent::Deleted {
            path: PathBuf::from("a"),
        });
        drop(sink);

        assert!(subscriber.recv().await.is_some());
        assert_eq!(subscriber.recv().await, None);
    }
}
