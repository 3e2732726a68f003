//! S3-compatible storage backend.
//!
//! Used for the durable cache tier: AWS S3, Google Cloud Storage through its
//! S3 interoperability endpoint, MinIO, Backblaze B2 and friends.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via configuration (`key_id` and
//! `key_secret`).

use crate::{
    FileInfo, StorageBackend,
    backend::{ByteStream, FileInfoStream},
    error::{ErrorKind, Result},
    validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::DisplayErrorContext,
    primitives::{ByteStream as S3ByteStream, DateTime},
    types::MetadataDirective,
};
use exn::{OptionExt, ResultExt};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::io::ReaderStream;

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

fn network_error<E: std::error::Error>(err: E) -> ErrorKind {
    ErrorKind::Unreachable(DisplayErrorContext(&err).to_string())
}

/// S3-compatible storage backend.
///
/// Stores files in an S3 bucket, optionally under a key prefix. All paths are
/// relative to the configured prefix (if any).
///
/// # Examples
///
/// ```no_run
/// use uade_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "durable",
///     "uade-cache",
///     Some("wav/".to_string()),
///     "auto",
///     Some("https://storage.googleapis.com"),
///     "access_key_id",
///     "secret_access_key",
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - Access key ID
    /// * `key_secret` - Secret access key
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        let credentials = Credentials::new(key_id, key_secret, None, None, "uade-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.into()))
            // 1 initial attempt + 3 retries with exponential backoff.
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for S3-compatible services.
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config_builder.build()),
            bucket: bucket.into(),
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Construct the full S3 key from a relative path.
    fn full_key(&self, path: &Path) -> Result<String> {
        let validated = validate_path(path)?;
        let path_str = validated.to_str().ok_or_raise(|| ErrorKind::InvalidPath(validated.clone()))?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path_str),
            None => path_str.to_string(),
        })
    }

    /// Strip the configured prefix from an S3 key to get relative path.
    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        let relative = match &self.prefix {
            Some(prefix) => {
                let prefix_normalized = prefix.trim_end_matches('/');
                key.strip_prefix(prefix_normalized).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
            },
            None => key,
        };
        validate_path(relative)
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::Backend("S3 request limiter closed".to_string()))
    }

    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::Backend("S3 datetime out of range".to_string()))
    }

    /// `HEAD` an object; `None` when it does not exist.
    async fn head(&self, path: &Path) -> Result<Option<FileInfo>> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => {
                let size = output.content_length().unwrap_or_default().max(0) as u64;
                let modified = match output.last_modified() {
                    Some(dt) => Self::parse_datetime(dt)?,
                    None => OffsetDateTime::now_utc(),
                };
                Ok(Some(FileInfo::new(path, size, modified)))
            },
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(None),
            Err(err) => exn::bail!(network_error(err)),
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let key_prefix = match prefix.map(|p| self.full_key(p)).transpose() {
            // Component-wise semantics: "samples" lists "samples/...", never
            // "samples-old/...".
            Ok(Some(key)) => Some(format!("{key}/")),
            Ok(None) => self.prefix.as_ref().map(|p| format!("{}/", p.trim_end_matches('/'))),
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(key_prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = match page {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(exn::Exn::from(network_error(err)));
                        break;
                    },
                };
                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    let path = match self.relative_path(key) {
                        Ok(path) => path,
                        Err(e) => { yield Err(e); continue; },
                    };
                    let modified = match object.last_modified().map(Self::parse_datetime).transpose() {
                        Ok(modified) => modified.unwrap_or_else(OffsetDateTime::now_utc),
                        Err(e) => { yield Err(e); continue; },
                    };
                    let size = object.size().unwrap_or_default().max(0) as u64;
                    yield Ok(FileInfo::new(path, size, modified));
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.head(path).await?.is_some())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(err) => exn::bail!(network_error(err)),
        };
        let body = output.body.collect().await.map_err(network_error)?;
        Ok(body.into_bytes().to_vec())
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(S3ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(network_error)?;
        tracing::debug!(backend = %self.name, key = %key, bytes = data.len(), "Uploaded object");
        Ok(())
    }

    async fn save_file(&self, path: &Path, source: &Path) -> Result<()> {
        let key = self.full_key(path)?;
        let body = S3ByteStream::from_path(source).await.map_err(network_error)?;
        let _permit = self.acquire_permit().await?;
        self.client.put_object().bucket(&self.bucket).key(&key).body(body).send().await.map_err(network_error)?;
        tracing::debug!(backend = %self.name, key = %key, source = %source.display(), "Uploaded object from file");
        Ok(())
    }

    async fn open(&self, path: &Path, range: Option<Range<u64>>) -> Result<ByteStream> {
        let key = self.full_key(path)?;
        // HTTP ranges are inclusive; an empty range cannot be expressed.
        let header = match range {
            Some(range) if range.end <= range.start => return Ok(Box::pin(futures::stream::empty())),
            Some(range) => Some(format!("bytes={}-{}", range.start, range.end - 1)),
            None => None,
        };
        let _permit = self.acquire_permit().await?;
        let output = match self.client.get_object().bucket(&self.bucket).key(&key).set_range(header).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(err) => exn::bail!(network_error(err)),
        };
        Ok(Box::pin(ReaderStream::new(output.body.into_async_read())))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        // S3 reports success for missing keys; so do we.
        self.client.delete_object().bucket(&self.bucket).key(&key).send().await.map_err(network_error)?;
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        self.head(path).await?.ok_or_raise(|| ErrorKind::NotFound(path.to_path_buf()))
    }

    /// Objects are immutable; a self-copy with replaced metadata is the only
    /// way to move `LastModified` forward.
    async fn touch(&self, path: &Path) -> Result<()> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        let touched = OffsetDateTime::now_utc().unix_timestamp().to_string();
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(&key)
            .copy_source(format!("{}/{}", self.bucket, key))
            .metadata_directive(MetadataDirective::Replace)
            .metadata("touched", touched)
            .send()
            .await
            .map_err(network_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend(prefix: Option<&str>) -> S3Backend {
        S3Backend::new(
            "test",
            "bucket",
            prefix.map(str::to_string),
            "auto",
            Some("http://127.0.0.1:9"),
            "key",
            "secret",
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_full_key() {
        let backend = backend(Some("cache/wav/")).await;
        assert_eq!(backend.full_key(Path::new("abc.wav")).unwrap(), "cache/wav/abc.wav");
        assert!(backend.full_key(Path::new("../abc.wav")).is_err());
        let bare = self::backend(None).await;
        assert_eq!(bare.full_key(Path::new("samples/x.smpl")).unwrap(), "samples/x.smpl");
    }

    #[tokio::test]
    async fn test_relative_path() {
        let backend = backend(Some("cache")).await;
        assert_eq!(backend.relative_path("cache/abc.flac").unwrap(), Path::new("abc.flac"));
        assert_eq!(backend.relative_path("cache/samples/x.smpl").unwrap(), Path::new("samples/x.smpl"));
    }

    #[tokio::test]
    async fn test_rejects_traversing_prefix() {
        let result = S3Backend::new("t", "b", Some("../up".to_string()), "auto", None::<String>, "k", "s").await;
        assert!(result.is_err());
    }
}
