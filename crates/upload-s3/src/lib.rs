//! Uploader backed by AWS S3 (or any S3-compatible endpoint).
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod target;

pub use error::Error;
pub use target::{S3Credentials, S3Target};

use std::path::Path;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use rotatable_upload::Uploader;
use tracing::debug;

/// Options for configuring an `S3Uploader`.
#[derive(Clone, Debug, Default)]
pub struct S3UploaderOptions {
    /// The S3 bucket to upload into (must be created in advance).
    pub bucket: String,

    /// The optional prefix to put in front of every key.
    pub prefix: Option<String>,

    /// The AWS region to use. Falls back to the environment when unset.
    pub region: Option<String>,

    /// Static credentials. Falls back to the default provider chain when unset.
    pub credentials: Option<S3Credentials>,

    /// Custom endpoint for S3-compatible services. Enables path-style addressing.
    pub endpoint: Option<String>,
}

impl From<S3Target> for S3UploaderOptions {
    fn from(target: S3Target) -> Self {
        Self {
            bucket: target.bucket,
            prefix: target.prefix,
            credentials: target.credentials,
            ..Self::default()
        }
    }
}

/// Uploader using AWS S3.
#[derive(Clone, Debug)]
pub struct S3Uploader {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: Option<String>,
}

impl S3Uploader {
    /// Creates a new `S3Uploader`, building a client from the options.
    pub async fn new(
        S3UploaderOptions {
            bucket,
            prefix,
            region,
            credentials,
            endpoint,
        }: S3UploaderOptions,
    ) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }

        if let Some(S3Credentials {
            access_key_id,
            secret_access_key,
        }) = credentials
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "rotatable",
            ));
        }

        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if endpoint.is_some() {
            s3_config_builder.set_force_path_style(Some(true));
        }

        Self::from_client(
            aws_sdk_s3::Client::from_conf(s3_config_builder.build()),
            bucket,
            prefix,
        )
    }

    /// Creates an `S3Uploader` around an already configured client.
    pub fn from_client(
        client: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        prefix: Option<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            client,
            prefix: prefix
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        }
    }

    /// The bucket uploads go to.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn get_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("gz") => "application/gzip",
        _ => "text/plain",
    }
}

#[async_trait]
impl Uploader for S3Uploader {
    type Error = Error;

    async fn upload(&self, path: &Path, key: &str) -> Result<String, Self::Error> {
        let key = self.get_key(key);
        let body = ByteStream::from_path(path).await?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type(path))
            .body(body)
            .send()
            .await
            .map_err(|e| Error::S3(Box::new(e.into())))?;

        debug!(bucket = %self.bucket, key, "uploaded object");

        Ok(format!("s3://{}/{}", self.bucket, key))
    }
}
