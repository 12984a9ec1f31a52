//! Pipes standard input into a size-rotated file.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod settings;

use std::path::PathBuf;

use clap::Parser;
use rotatable::{LockManager, RotatingWriter, Size};
use rotatable_upload_fs::FsUploader;
use rotatable_upload_s3::S3Uploader;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{Level, info};

pub use error::Error;
use settings::{FileConfig, Overrides, Settings, UploadTarget};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// File to write. Rotated files are created next to it.
    file: PathBuf,

    /// Rotate once the file reaches this size, e.g. `100mb` or `1048576`
    #[arg(short, long, env = "ROTATABLE_SIZE")]
    size: Option<Size>,

    /// Gzip rotated files
    #[arg(short, long)]
    gzip: bool,

    /// Upload rotated files to `s3://[key:secret@]bucket/prefix` or `file:///dir`
    #[arg(short, long, env = "ROTATABLE_UPLOAD")]
    upload: Option<String>,

    /// Appended to rotated file names
    #[arg(long)]
    suffix: Option<String>,

    /// TOML config file
    #[arg(short, long, env = "ROTATABLE_CONFIG")]
    config: Option<PathBuf>,

    /// Table of the config file to read
    #[arg(long, default_value = "rotatable")]
    config_key: String,

    /// Log rotations and pipeline progress to stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn settings(&self) -> Result<Settings, Error> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path, &self.config_key)?,
            None => FileConfig::default(),
        };

        let overrides = Overrides {
            size: self.size.clone(),
            suffix: self.suffix.clone(),
            gzip: self.gzip,
            upload: self.upload.clone(),
        };

        Settings::merge(overrides, file)
    }
}

async fn open_writer(file: PathBuf, settings: Settings) -> Result<RotatingWriter, Error> {
    let builder = RotatingWriter::builder(file, settings.options);

    let writer = match settings.upload {
        None => builder.open().await?,
        Some(UploadTarget::Dir(dir)) => builder.uploader(FsUploader::new(dir)).open().await?,
        Some(UploadTarget::S3(target)) => {
            let uploader = S3Uploader::new(target.into()).await;
            builder.uploader(uploader).open().await?
        }
    };

    Ok(writer)
}

/// Copies `reader` into `writer` one line at a time so no line is split
/// across two files. Returns the number of lines written.
async fn pump<R, L>(reader: &mut R, writer: &mut RotatingWriter<L>) -> Result<u64, Error>
where
    R: AsyncBufRead + Unpin,
    L: LockManager,
{
    let mut line = Vec::new();
    let mut lines = 0;

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| Error::Io("error reading input", e))?;

        if read == 0 {
            return Ok(lines);
        }

        writer.write(&line).await?;
        lines += 1;
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if args.verbose { Level::INFO } else { Level::WARN })
        .init();

    let settings = args.settings()?;
    let mut writer = open_writer(args.file, settings).await?;

    let pumped = pump(&mut BufReader::new(tokio::io::stdin()), &mut writer).await;
    // Drain the pipeline even if input failed.
    let closed = writer.close().await;

    let lines = pumped?;
    closed?;

    info!(lines, "input closed");

    Ok(())
}
