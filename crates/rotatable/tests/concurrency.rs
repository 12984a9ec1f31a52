//! Several writers, one path

mod common;

use std::collections::HashSet;
use std::path::Path;

use common::{LOG_NAME, count, line, options, read_log, rotated_files};
use rotatable::{LockManager, RotatingWriter, RotatingWriterOptions, RotationEvent};
use rotatable_locks_memory::MemoryLockManager;
use tempfile::tempdir;

const LINES_PER_WRITER: usize = 6;
const THRESHOLD: u64 = 100;

async fn write_lines<L: LockManager>(
    mut writer: RotatingWriter<L>,
    name: &'static str,
) -> Vec<RotationEvent> {
    let mut events = writer.subscribe();
    for i in 1..=LINES_PER_WRITER {
        writer.write(line(i, name).as_bytes()).await.unwrap();
        tokio::task::yield_now().await;
    }
    writer.close().await.unwrap();
    events.drain()
}

fn assert_consistent(dir: &Path, events: &[RotationEvent], writers: &[&str]) {
    let rotated = rotated_files(dir);
    let started = count(events, |e| matches!(e, RotationEvent::RotateStarted { .. }));
    let completed = count(events, |e| matches!(e, RotationEvent::Rotated { .. }));

    // Every rename attempted under the lock produced exactly one file.
    assert_eq!(started, rotated.len());
    assert_eq!(completed, rotated.len());

    // A file is only renamed once it holds at least a threshold's worth.
    for path in &rotated {
        let size = read_log(path).len() as u64;
        assert!(size >= THRESHOLD, "{} rotated at {size} bytes", path.display());
    }

    let mut contents: String = rotated.iter().map(|p| read_log(p)).collect();
    contents.push_str(&read_log(&dir.join(LOG_NAME)));

    let lines: Vec<&str> = contents.lines().collect();
    let unique: HashSet<&str> = lines.iter().copied().collect();
    assert_eq!(lines.len(), writers.len() * LINES_PER_WRITER);
    assert_eq!(unique.len(), lines.len());
    for name in writers {
        for i in 1..=LINES_PER_WRITER {
            let expected = line(i, name);
            assert!(unique.contains(expected.trim_end()), "missing {expected}");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_writers_with_file_locks_share_one_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(LOG_NAME);

    let first = RotatingWriter::open(&path, options(THRESHOLD)).await.unwrap();
    let second = RotatingWriter::open(&path, options(THRESHOLD)).await.unwrap();

    let (a, b) = tokio::join!(
        tokio::spawn(write_lines(first, "w1")),
        tokio::spawn(write_lines(second, "w2")),
    );
    let mut events = a.unwrap();
    events.extend(b.unwrap());

    assert_consistent(dir.path(), &events, &["w1", "w2"]);
    assert!(!dir.path().join("test.log.lock").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_four_writers_with_memory_locks_share_one_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(LOG_NAME);
    let manager = MemoryLockManager::new();
    let names = ["w1", "w2", "w3", "w4"];

    let mut tasks = Vec::new();
    for name in names {
        let writer = RotatingWriter::builder(&path, options(THRESHOLD))
            .lock_manager(manager.peer())
            .open()
            .await
            .unwrap();
        tasks.push(tokio::spawn(write_lines(writer, name)));
    }

    let mut events = Vec::new();
    for task in tasks {
        events.extend(task.await.unwrap());
    }

    assert_consistent(dir.path(), &events, &names);
}

#[tokio::test]
async fn test_writer_follows_peer_rotation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(LOG_NAME);

    let mut rotator = RotatingWriter::open(&path, options(20)).await.unwrap();
    let mut follower = RotatingWriter::open(&path, options(20)).await.unwrap();
    let before = follower.identity();

    rotator.write(b"enough bytes to rotate\n").await.unwrap();
    follower.write(b"after\n").await.unwrap();

    // The follower noticed the rename and moved to the fresh file.
    assert_ne!(follower.identity(), before);
    assert_eq!(follower.identity(), rotator.identity());
    assert_eq!(read_log(&path), "after\n");

    rotator.close().await.unwrap();
    follower.close().await.unwrap();
    assert_eq!(rotated_files(dir.path()).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn test_compressed_rotations_keep_every_line() {
    let names = ["w1", "w2", "w3"];

    for _ in 0..5 {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LOG_NAME);
        let compressed = RotatingWriterOptions {
            compress: true,
            ..options(THRESHOLD)
        };

        let mut tasks = Vec::new();
        for name in names {
            let writer = RotatingWriter::open(&path, compressed.clone()).await.unwrap();
            tasks.push(tokio::spawn(write_lines(writer, name)));
        }

        let mut events = Vec::new();
        for task in tasks {
            events.extend(task.await.unwrap());
        }

        assert!(rotated_files(dir.path()).iter().all(|p| p.extension().is_some_and(|e| e == "gz")));
        assert_consistent(dir.path(), &events, &names);
    }
}
