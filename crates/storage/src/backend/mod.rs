//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for storage operations across different backends (local
//! filesystem, S3-compatible services, in-memory for tests).

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use async_trait::async_trait;
use bytes::Bytes;
use exn::ResultExt;
use futures::{Stream, StreamExt, TryStreamExt};
use std::ops::Range;
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncWriteExt;

type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Body of a file opened for reading, yielded in chunks.
///
/// Errors mid-stream are plain [`std::io::Error`]s so the stream can be handed
/// straight to an HTTP body.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + 'static>>;

/// Unified interface for storage backends.
///
/// All storage operations are asynchronous to efficiently handle network
/// operations and concurrent access.
///
/// # Path Handling
/// All paths are relative to the storage root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use uade_storage::{backend::StorageBackend, error::Result};
///
/// async fn cached_size(backend: &dyn StorageBackend) -> Result<u64> {
///     let path = Path::new("9f86d081884c7d65.flac");
///     if backend.exists(path).await? {
///         Ok(backend.stat(path).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// List all files matching an optional prefix.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<FileInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream file metadata matching an optional prefix.
    ///
    /// If a prefix is provided, only files whose paths start with the prefix
    /// (component-wise) are returned. A prefix that does not exist yields an
    /// empty stream, not an error.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use uade_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream(Some(Path::new("samples")));
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.path.display(), info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a>;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents, creating or replacing the file.
    ///
    /// Readers never observe a partially written file.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Store the contents of a local file under `path`.
    ///
    /// The default implementation reads the whole source into memory;
    /// backends override it to stream.
    async fn save_file(&self, path: &Path, source: &Path) -> Result<()> {
        let data = tokio::fs::read(source).await.map_err(ErrorKind::Io)?;
        self.write(path, &data).await
    }

    /// Copy a stored file out to a local destination path.
    async fn download(&self, path: &Path, dest: &Path) -> Result<u64> {
        let mut body = self.open(path, None).await?;
        let mut file = tokio::fs::File::create(dest).await.map_err(ErrorKind::Io)?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(ErrorKind::Io)?;
            file.write_all(&chunk).await.map_err(ErrorKind::Io)?;
            written += chunk.len() as u64;
        }
        file.flush().await.or_raise(|| ErrorKind::Backend(format!("flushing {}", dest.display())))?;
        Ok(written)
    }

    /// Open a file for streaming reads, optionally restricted to a half-open
    /// byte range.
    ///
    /// The range must already be clamped to the file size by the caller.
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use uade_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let first_ten: Vec<_> = backend
    ///     .open(Path::new("song.wav"), Some(0..10))
    ///     .await?
    ///     .try_collect()
    ///     .await
    ///     .unwrap();
    /// # Ok(())
    /// # }
    /// ```
    async fn open(&self, path: &Path, range: Option<Range<u64>>) -> Result<ByteStream>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist and the backend can tell.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Get file metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Refresh the modified timestamp so retention treats the file as
    /// recently used.
    async fn touch(&self, path: &Path) -> Result<()>;
}
