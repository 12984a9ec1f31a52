use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::Error;

/// Static credentials embedded in an upload target.
#[derive(Clone, PartialEq, Eq)]
pub struct S3Credentials {
    /// AWS access key id.
    pub access_key_id: String,

    /// AWS secret access key.
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Parsed form of `s3://[accessKey:secretKey@]bucket/prefix/to/file`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct S3Target {
    /// Destination bucket.
    pub bucket: String,

    /// Key prefix inside the bucket, without leading or trailing slashes.
    pub prefix: Option<String>,

    /// Credentials given inline, if any.
    pub credentials: Option<S3Credentials>,
}

impl FromStr for S3Target {
    type Err = Error;

    fn from_str(target: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| Error::InvalidTarget {
            target: redact(target),
            reason,
        };

        let url = Url::parse(target).map_err(|_| invalid("not a URL"))?;

        if url.scheme() != "s3" {
            return Err(invalid("scheme must be s3://"));
        }

        let bucket = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing bucket"))?
            .to_string();

        let credentials = match (url.username(), url.password()) {
            ("", None) => None,
            ("", Some(_)) => return Err(invalid("secret key given without access key")),
            (_, None) => return Err(invalid("access key given without secret key")),
            (access_key_id, Some(secret_access_key)) => Some(S3Credentials {
                access_key_id: decode(access_key_id).ok_or_else(|| invalid("access key is not UTF-8"))?,
                secret_access_key: decode(secret_access_key)
                    .ok_or_else(|| invalid("secret key is not UTF-8"))?,
            }),
        };

        let prefix = url.path().trim_matches('/');
        let prefix = if prefix.is_empty() {
            None
        } else {
            Some(decode(prefix).ok_or_else(|| invalid("prefix is not UTF-8"))?)
        };

        Ok(Self {
            bucket,
            prefix,
            credentials,
        })
    }
}

impl Display for S3Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "s3://{}", self.bucket)?;
        if let Some(prefix) = &self.prefix {
            write!(f, "/{prefix}")?;
        }
        Ok(())
    }
}

fn decode(value: &str) -> Option<String> {
    percent_decode_str(value)
        .decode_utf8()
        .ok()
        .map(std::borrow::Cow::into_owned)
}

// Keeps secrets out of error messages.
fn redact(target: &str) -> String {
    match (target.find("://"), target.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}<credentials>{}", &target[..scheme_end + 3], &target[at..])
        }
        _ => target.to_string(),
    }
}
