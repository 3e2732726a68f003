//! Local filesystem storage backend.
//!
//! Files are stored in a configured directory and accessed using
//! `tokio::fs` for async I/O. Writes go to a temporary sibling first and are
//! renamed into place, so concurrent writers of the same key never expose a
//! truncated file (last writer wins).

use crate::backend::{ByteStream, FileInfoStream};
use crate::error::ErrorKind;
use crate::{FileInfo, StorageBackend, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::fs::{self, DirEntry};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Suffix of in-flight writes. Listings skip these.
const PARTIAL_SUFFIX: &str = ".part";

static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// All paths are relative to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use uade_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("cache", "/tmp/uade-web/cache")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend, creating the root directory if
    /// it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists but is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Use non-async here; it'll only happen once on startup and it's
            // not worth making the constructor async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute filesystem path of a (validated) relative storage path.
    ///
    /// Collaborators that need a real file (the encoder, the HTTP layer)
    /// go through this rather than joining paths themselves.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    /// Convert an absolute path back to a relative storage path.
    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        if !absolute.is_absolute() {
            exn::bail!(ErrorKind::Backend(format!(
                "attempting to get relative path of non-absolute path `{:?}`",
                absolute
            )))
        }
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::Backend(format!("path `{:?}` is not within root `{:?}`", absolute, self.root))
        })?;
        validate_path(relative)
    }

    fn metadata(path: &Path, metadata: Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        Ok(FileInfo::new(path, metadata.len(), modified))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::Denied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }

    /// A unique sibling path to stage a write into before renaming.
    fn partial_path(target: &Path) -> PathBuf {
        let n = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        target.with_file_name(format!(".{name}.{}.{n}{PARTIAL_SUFFIX}", std::process::id()))
    }

    async fn prepare_parent(&self, abs_path: &Path, path: &Path) -> Result<()> {
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        Ok(())
    }

    async fn commit(partial: &Path, abs_path: &Path, path: &Path) -> Result<()> {
        if let Err(e) = fs::rename(partial, abs_path).await {
            let _ = fs::remove_file(partial).await;
            exn::bail!(Self::map_io_error(e, path));
        }
        Ok(())
    }

    async fn process_entry(&self, entry: DirEntry, prefix: Option<&Path>) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| Self::map_io_error(e, &path))?;
        let relative = self.relative_path(&path)?;
        if let Some(pfx) = prefix
            && !relative.starts_with(pfx)
        {
            return Ok(WalkEntry::Skip);
        }
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        let partial = relative.to_string_lossy().ends_with(PARTIAL_SUFFIX);
        if metadata.is_file() && !partial {
            return Ok(WalkEntry::File(Self::metadata(&relative, metadata)?));
        }
        // Broken symlinks and in-flight writes.
        Ok(WalkEntry::Skip)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };

        // Walk from the parent directory of the prefix path, so a prefix
        // whose leaf doesn't exist yet (or is a file) is not an error.
        // Path::starts_with is component-based: "samples" does not match
        // "samples-old/x".
        let start_dir = validated_prefix
            .as_ref()
            .map(|prefix| self.root.join(prefix).parent().unwrap_or(&self.root).to_path_buf())
            .unwrap_or_else(|| self.root.clone());
        let mut stack = vec![start_dir];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // Consistent with S3: listing a missing directory is empty.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(Self::map_io_error(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(Self::map_io_error(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry, validated_prefix.as_deref()).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.resolve(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.resolve(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.resolve(path)?;
        self.prepare_parent(&abs_path, path).await?;
        let partial = Self::partial_path(&abs_path);
        fs::write(&partial, data).await.map_err(|e| Self::map_io_error(e, path))?;
        Self::commit(&partial, &abs_path, path).await
    }

    async fn save_file(&self, path: &Path, source: &Path) -> Result<()> {
        let abs_path = self.resolve(path)?;
        self.prepare_parent(&abs_path, path).await?;
        let partial = Self::partial_path(&abs_path);
        fs::copy(source, &partial).await.map_err(|e| Self::map_io_error(e, source))?;
        Self::commit(&partial, &abs_path, path).await
    }

    async fn download(&self, path: &Path, dest: &Path) -> Result<u64> {
        let abs_path = self.resolve(path)?;
        Ok(fs::copy(&abs_path, dest).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn open(&self, path: &Path, range: Option<Range<u64>>) -> Result<ByteStream> {
        let abs_path = self.resolve(path)?;
        let mut file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        let stream: ByteStream = match range {
            Some(range) => {
                file.seek(std::io::SeekFrom::Start(range.start)).await.map_err(ErrorKind::Io)?;
                let length = range.end.saturating_sub(range.start);
                Box::pin(ReaderStream::new(file.take(length)))
            },
            None => Box::pin(ReaderStream::new(file)),
        };
        Ok(stream)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.resolve(path)?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.resolve(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        Self::metadata(path, metadata)
    }

    async fn touch(&self, path: &Path) -> Result<()> {
        let abs_path = self.resolve(path)?;
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> std::result::Result<(), ErrorKind> {
            let file = std::fs::File::options().write(true).open(&abs_path).map_err(|e| Self::map_io_error(e, &owned))?;
            file.set_modified(SystemTime::now()).map_err(ErrorKind::Io)
        })
        .await
        .or_raise(|| ErrorKind::Backend("touch task panicked".to_string()))??;
        Ok(())
    }
}
