//! Cross-process locks built on exclusive creation of a marker file.
//!
//! Every process that wants to enter the critical section for a resource
//! tries to create the same marker path with `O_CREAT | O_EXCL`. Whoever
//! succeeds holds the lock until the marker is removed again. A marker older
//! than the stale timeout is treated as left behind by a crashed holder and
//! may be reclaimed. The exclusion is cooperative: processes that ignore the
//! marker are not held back.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use rotatable_locks::{LockManager, LockStatus};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

/// Default age after which a marker is considered abandoned.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time spent waiting for a contended lock.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay between acquisition attempts while waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Options for configuring a `FileLockManager`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileLockOptions {
    /// Age after which an existing marker may be reclaimed.
    pub stale_timeout: Duration,

    /// Upper bound on how long `lock` waits before failing.
    pub wait_timeout: Duration,

    /// Delay between acquisition attempts.
    pub poll_interval: Duration,
}

impl Default for FileLockOptions {
    fn default() -> Self {
        Self {
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Lock manager whose resource ids are marker file paths.
#[derive(Clone, Debug)]
pub struct FileLockManager {
    holder: String,
    options: FileLockOptions,
}

impl Default for FileLockManager {
    fn default() -> Self {
        Self::new(FileLockOptions::default())
    }
}

impl FileLockManager {
    /// Creates a new `FileLockManager` with a fresh holder token.
    #[must_use]
    pub fn new(options: FileLockOptions) -> Self {
        Self {
            holder: format!("{}-{:08x}", std::process::id(), rand::random::<u32>()),
            options,
        }
    }

    /// The token this manager writes into the markers it creates.
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// The options this manager was created with.
    #[must_use]
    pub const fn options(&self) -> &FileLockOptions {
        &self.options
    }

    async fn create_marker(&self, path: &Path) -> Result<bool, Error> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(Error::Io("error creating lock file", e)),
        };

        let written = async {
            file.write_all(self.holder.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(path).await;
            return Err(Error::Io("error writing lock file", e));
        }

        Ok(true)
    }

    /// Removes the marker at `path` if it is older than the stale timeout.
    /// Returns whether a marker was reclaimed.
    async fn reclaim_if_stale(&self, path: &Path) -> Result<bool, Error> {
        let modified = match fs::metadata(path).await {
            Ok(metadata) => metadata
                .modified()
                .map_err(|e| Error::Io("error reading lock file mtime", e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(Error::Io("error reading lock file metadata", e)),
        };

        if !is_stale(modified, self.options.stale_timeout) {
            return Ok(false);
        }

        let stale_holder = match fs::read_to_string(path).await {
            Ok(holder) => holder,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(Error::Io("error reading lock file", e)),
        };

        warn!(path = %path.display(), holder = %stale_holder, "reclaiming stale lock file");

        self.reclaim(path, &stale_holder).await
    }

    /// Moves the marker aside and deletes it only if it still carries
    /// `stale_holder`. A marker that a peer re-created in the meantime is
    /// linked back into place.
    async fn reclaim(&self, path: &Path, stale_holder: &str) -> Result<bool, Error> {
        let aside = aside_path(path, &self.holder);

        match fs::rename(path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(Error::Io("error moving stale lock file", e)),
        }

        let moved = fs::read_to_string(&aside)
            .await
            .map_err(|e| Error::Io("error reading moved lock file", e));

        let reclaimed = match moved {
            Ok(holder) if holder == stale_holder => true,
            Ok(holder) => {
                debug!(path = %path.display(), %holder, "lock file re-created by a peer, restoring it");
                match fs::hard_link(&aside, path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        warn!(path = %path.display(), %holder, "lock file taken while restoring it");
                    }
                    Err(e) => {
                        let _ = fs::remove_file(&aside).await;
                        return Err(Error::Io("error restoring lock file", e));
                    }
                }
                false
            }
            Err(e) => {
                let _ = fs::remove_file(&aside).await;
                return Err(e);
            }
        };

        match fs::remove_file(&aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io("error removing stale lock file", e)),
        }

        Ok(reclaimed)
    }
}

/// Unique sibling of `path` used while judging a stale marker.
fn aside_path(path: &Path, holder: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".stale-{holder}-{:08x}", rand::random::<u32>()));
    path.with_file_name(name)
}

fn is_stale(modified: SystemTime, stale_timeout: Duration) -> bool {
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age > stale_timeout)
}

/// Guard for a marker created by [`FileLockManager`]. Removes the marker on
/// drop, provided it still carries this holder's token.
#[derive(Debug)]
pub struct FileLockGuard {
    path: PathBuf,
    holder: String,
    released: bool,
}

impl FileLockGuard {
    /// Path of the marker this guard holds.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock now. Dropping the guard has the same effect.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // A stale-reclaim by a peer may have replaced our marker.
        match std::fs::read_to_string(&self.path) {
            Ok(contents) if contents == self.holder => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(path = %self.path.display(), "failed to remove lock file: {e}");
                    }
                }
                trace!(path = %self.path.display(), "file lock released");
            }
            Ok(_) => {
                debug!(path = %self.path.display(), "lock file taken over by another holder");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), "failed to read lock file on release: {e}");
            }
        }
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[async_trait]
impl LockManager for FileLockManager {
    type Error = Error;
    type Guard = FileLockGuard;

    async fn check(&self, resource_id: String) -> Result<LockStatus, Self::Error> {
        let path = PathBuf::from(resource_id);

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LockStatus::Free),
            Err(e) => return Err(Error::Io("error reading lock file metadata", e)),
        };

        let modified = metadata
            .modified()
            .map_err(|e| Error::Io("error reading lock file mtime", e))?;
        if is_stale(modified, self.options.stale_timeout) {
            return Ok(LockStatus::Free);
        }

        match fs::read_to_string(&path).await {
            Ok(holder) if holder == self.holder => Ok(LockStatus::HeldBySelf),
            Ok(holder) => Ok(LockStatus::HeldByOther(holder)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LockStatus::Free),
            Err(e) => Err(Error::Io("error reading lock file", e)),
        }
    }

    async fn lock(&self, resource_id: String) -> Result<Self::Guard, Self::Error> {
        let started = Instant::now();

        loop {
            if let Some(guard) = self.try_lock(resource_id.clone()).await? {
                return Ok(guard);
            }

            let waited = started.elapsed();
            if waited >= self.options.wait_timeout {
                return Err(Error::Timeout {
                    path: PathBuf::from(resource_id),
                    waited,
                });
            }

            trace!(resource_id, "lock busy, retrying");
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    async fn try_lock(&self, resource_id: String) -> Result<Option<Self::Guard>, Self::Error> {
        let path = PathBuf::from(resource_id);

        let mut acquired = self.create_marker(&path).await?;
        if !acquired && self.reclaim_if_stale(&path).await? {
            acquired = self.create_marker(&path).await?;
        }

        if !acquired {
            return Ok(None);
        }

        trace!(path = %path.display(), holder = %self.holder, "file lock acquired");

        Ok(Some(FileLockGuard {
            path,
            holder: self.holder.clone(),
            released: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use filetime::FileTime;
    use tempfile::tempdir;

    fn fast_options() -> FileLockOptions {
        FileLockOptions {
            stale_timeout: Duration::from_secs(10),
            wait_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn lock_id(dir: &Path) -> String {
        dir.join("app.log.lock").to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_lock_creates_and_release_removes_marker() {
        let dir = tempdir().unwrap();
        let manager = FileLockManager::new(fast_options());
        let id = lock_id(dir.path());

        let guard = manager.lock(id.clone()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&id).unwrap(), manager.holder());
        assert_eq!(manager.check(id.clone()).await.unwrap(), LockStatus::HeldBySelf);

        guard.release();
        assert!(!Path::new(&id).exists());
        assert_eq!(manager.check(id).await.unwrap(), LockStatus::Free);
    }

    #[tokio::test]
    async fn test_try_lock_fails_while_peer_holds() {
        let dir = tempdir().unwrap();
        let first = FileLockManager::new(fast_options());
        let second = FileLockManager::new(fast_options());
        let id = lock_id(dir.path());

        let _guard = first.try_lock(id.clone()).await.unwrap().unwrap();

        assert!(second.try_lock(id.clone()).await.unwrap().is_none());
        assert_matches!(
            second.check(id).await.unwrap(),
            LockStatus::HeldByOther(holder) if holder == first.holder()
        );
    }

    #[tokio::test]
    async fn test_lock_times_out() {
        let dir = tempdir().unwrap();
        let first = FileLockManager::new(fast_options());
        let second = FileLockManager::new(fast_options());
        let id = lock_id(dir.path());

        let _guard = first.lock(id.clone()).await.unwrap();

        assert_matches!(second.lock(id).await, Err(Error::Timeout { waited, .. }) if waited >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed() {
        let dir = tempdir().unwrap();
        let id = lock_id(dir.path());

        std::fs::write(&id, "crashed-holder").unwrap();
        let old = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(60));
        filetime::set_file_mtime(&id, old).unwrap();

        let manager = FileLockManager::new(fast_options());
        assert_eq!(manager.check(id.clone()).await.unwrap(), LockStatus::Free);

        let _guard = manager.try_lock(id.clone()).await.unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(&id).unwrap(), manager.holder());
    }

    #[tokio::test]
    async fn test_reclaim_restores_marker_recreated_by_peer() {
        let dir = tempdir().unwrap();
        let id = lock_id(dir.path());
        let path = Path::new(&id);

        // A peer already reclaimed the crashed holder's marker and made its own.
        std::fs::write(path, "peer-holder").unwrap();

        let manager = FileLockManager::new(fast_options());
        assert!(!manager.reclaim(path, "crashed-holder").await.unwrap());

        assert_eq!(std::fs::read_to_string(path).unwrap(), "peer-holder");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .filter(|name| name.to_string_lossy().contains(".stale-"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
        assert!(manager.try_lock(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reclaim_removes_matching_stale_marker() {
        let dir = tempdir().unwrap();
        let id = lock_id(dir.path());
        let path = Path::new(&id);
        std::fs::write(path, "crashed-holder").unwrap();

        let manager = FileLockManager::new(fast_options());
        assert!(manager.reclaim(path, "crashed-holder").await.unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_release_leaves_foreign_marker_alone() {
        let dir = tempdir().unwrap();
        let manager = FileLockManager::new(fast_options());
        let id = lock_id(dir.path());

        let guard = manager.lock(id.clone()).await.unwrap();
        std::fs::write(&id, "someone-else").unwrap();

        drop(guard);
        assert_eq!(std::fs::read_to_string(&id).unwrap(), "someone-else");
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let dir = tempdir().unwrap();
        let first = FileLockManager::new(FileLockOptions {
            wait_timeout: Duration::from_secs(2),
            ..fast_options()
        });
        let second = first.clone();
        let id = lock_id(dir.path());

        let guard = first.lock(id.clone()).await.unwrap();
        let waiter = tokio::spawn({
            let id = id.clone();
            async move { second.lock(id).await.map(|_| ()) }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(guard);

        waiter.await.unwrap().unwrap();
    }
}
