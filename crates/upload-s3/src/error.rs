use aws_sdk_s3::primitives::ByteStreamError;
use rotatable_upload::UploaderError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The local file could not be opened for streaming.
    #[error("error reading upload source: {0}")]
    ByteStream(#[from] ByteStreamError),

    /// The upload target string is malformed.
    #[error("invalid upload target `{target}`: {reason}")]
    InvalidTarget {
        /// The rejected target.
        target: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The S3 request failed.
    #[error(transparent)]
    S3(#[from] Box<aws_sdk_s3::Error>),
}

impl UploaderError for Error {}
