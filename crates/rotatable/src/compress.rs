//! Gzip compression of rotated files

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::artifact::compressed_path;
use crate::error::{Error, Result};

/// How long a rotated file has to stay unchanged before it is considered
/// complete. Peers that checked the file before it was renamed may still
/// append to it for a short while.
pub(crate) const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Gzips `path` into its `.gz` sibling and returns the sibling's path. The
/// source file is left in place.
///
/// Bytes appended to the source while it is being compressed are picked up,
/// as long as they arrive within [`SETTLE_DELAY`] of the previous read.
pub async fn gzip(path: &Path) -> Result<PathBuf> {
    let source = path.to_path_buf();
    let destination = compressed_path(path);

    let task = {
        let source = source.clone();
        let destination = destination.clone();
        tokio::task::spawn_blocking(move || {
            gzip_blocking(&source, &destination, || thread::sleep(SETTLE_DELAY))
        })
    };

    let result = task
        .await
        .map_err(|e| io::Error::other(format!("compression task failed: {e}")))
        .and_then(|r| r);

    match result {
        Ok(_) => Ok(destination),
        Err(source_err) => {
            // Don't leave a truncated archive next to the original.
            let _ = tokio::fs::remove_file(&destination).await;
            Err(Error::Compress {
                path: source,
                source: source_err,
            })
        }
    }
}

/// Compresses `source` into `destination`, calling `settle` and reading the
/// source again until a pass finds no new bytes. Returns the bytes consumed.
fn gzip_blocking(source: &Path, destination: &Path, mut settle: impl FnMut()) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(source)?);
    let writer = BufWriter::new(File::create(destination)?);

    let mut encoder = GzEncoder::new(writer, Compression::default());
    let mut consumed = io::copy(&mut reader, &mut encoder)?;

    loop {
        settle();
        let late = io::copy(&mut reader, &mut encoder)?;
        if late == 0 {
            break;
        }
        consumed += late;
    }

    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    Ok(consumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;

    use assert_matches::assert_matches;
    use flate2::read::GzDecoder;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_gzip_round_trips_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log.1");
        let contents = "{\"i\":1}\n".repeat(100);
        std::fs::write(&path, &contents).unwrap();

        let gz_path = gzip(&path).await.unwrap();
        assert_eq!(gz_path, dir.path().join("app.log.1.gz"));
        assert!(path.exists());

        let mut decoded = String::new();
        GzDecoder::new(File::open(&gz_path).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, contents);
    }

    #[test]
    fn test_gzip_picks_up_late_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log.1");
        let gz_path = dir.path().join("app.log.1.gz");
        std::fs::write(&path, "early\n").unwrap();

        let mut passes = 0;
        let consumed = gzip_blocking(&path, &gz_path, || {
            passes += 1;
            if passes <= 2 {
                let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
                writeln!(file, "late {passes}").unwrap();
            }
        })
        .unwrap();

        // Two appends, then one quiet pass.
        assert_eq!(passes, 3);
        assert_eq!(consumed, std::fs::metadata(&path).unwrap().len());

        let mut decoded = String::new();
        GzDecoder::new(File::open(&gz_path).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "early\nlate 1\nlate 2\n");
    }

    #[tokio::test]
    async fn test_gzip_missing_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.log");

        assert_matches!(gzip(&path).await, Err(Error::Compress { .. }));
        assert!(!dir.path().join("gone.log.gz").exists());
    }
}
