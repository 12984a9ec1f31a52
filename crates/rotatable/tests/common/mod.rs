//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use rotatable::{RotatingWriterOptions, RotationEvent};

pub const LOG_NAME: &str = "test.log";

pub fn options(size_threshold: u64) -> RotatingWriterOptions {
    RotatingWriterOptions {
        size_threshold,
        ..RotatingWriterOptions::default()
    }
}

/// `{"i":1,"w":"w1"}\n`, 17 bytes for single-digit `i`.
pub fn line(i: usize, writer: &str) -> String {
    format!("{{\"i\":{i},\"w\":\"{writer}\"}}\n")
}

/// Files in `dir` whose name starts with the log name, lock files excluded,
/// sorted so rotated files (which embed a timestamp) come in rotation order.
pub fn log_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            let name = path.file_name().unwrap().to_string_lossy();
            name.starts_with(LOG_NAME) && !name.ends_with(".lock")
        })
        .collect();
    files.sort();
    files
}

/// Rotated files only, in rotation order.
pub fn rotated_files(dir: &Path) -> Vec<PathBuf> {
    let active = dir.join(LOG_NAME);
    log_files(dir).into_iter().filter(|p| *p != active).collect()
}

/// Contents of a log file, transparently gunzipping `.gz` files.
pub fn read_log(path: &Path) -> String {
    let mut contents = String::new();
    if path.extension().is_some_and(|ext| ext == "gz") {
        GzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut contents)
            .unwrap();
    } else {
        File::open(path).unwrap().read_to_string(&mut contents).unwrap();
    }
    contents
}

/// Rotated files in order, then the active file, concatenated.
pub fn read_all(dir: &Path) -> String {
    let mut out: String = rotated_files(dir).iter().map(|p| read_log(p)).collect();
    let active = dir.join(LOG_NAME);
    if active.exists() {
        out.push_str(&read_log(&active));
    }
    out
}

pub fn count(events: &[RotationEvent], pred: impl Fn(&RotationEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}
