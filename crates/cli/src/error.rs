use thiserror::Error;

/// CLI-specific error type
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid settings
    #[error("config error: {0}")]
    Config(String),

    /// IO operation failed
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// Writer error
    #[error(transparent)]
    Rotatable(#[from] rotatable::Error),

    /// Config file is not valid TOML
    #[error("config file error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed S3 upload target
    #[error(transparent)]
    UploadTarget(#[from] rotatable_upload_s3::Error),
}
