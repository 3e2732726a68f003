//! The two storage tiers and the failure policy between them.
//!
//! Local errors propagate. Durable errors are logged and treated as "not
//! there", so an unreachable bucket costs a re-decode, never a failed request.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use uade_storage::backend::LocalBackend;
use uade_storage::{BackendHandle, FileInfo, StorageBackend};

#[derive(Clone)]
pub(crate) struct Tiers {
    pub(crate) local: LocalBackend,
    pub(crate) durable: Option<BackendHandle>,
}

impl Tiers {
    pub(crate) fn local_path(&self, key: &Path) -> Result<PathBuf> {
        self.local.resolve(key).or_raise(|| ErrorKind::Storage)
    }

    /// Metadata of a local entry, `None` if absent.
    pub(crate) async fn local_info(&self, key: &Path) -> Result<Option<FileInfo>> {
        match self.local.stat(key).await {
            Ok(info) => Ok(Some(info)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err).or_raise(|| ErrorKind::Storage),
        }
    }

    pub(crate) async fn touch_local(&self, key: &Path) {
        if let Err(err) = self.local.touch(key).await {
            tracing::debug!(key = %key.display(), error = %*err, "Could not refresh local cache entry");
        }
    }

    pub(crate) async fn durable_has(&self, key: &Path) -> bool {
        let Some(durable) = &self.durable else {
            return false;
        };
        match durable.exists(key).await {
            Ok(exists) => exists,
            Err(err) => {
                tracing::warn!(backend = durable.name(), key = %key.display(), error = %*err, "Durable tier lookup failed; treating as a miss");
                false
            },
        }
    }

    /// Copy a durable entry into the local tier (atomically) and refresh it
    /// in the durable tier. `None` when the durable tier does not have it or
    /// cannot be reached.
    pub(crate) async fn pull(&self, key: &Path) -> Result<Option<FileInfo>> {
        let Some(durable) = &self.durable else {
            return Ok(None);
        };
        if !self.durable_has(key).await {
            return Ok(None);
        }
        let dest = self.local_path(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Storage)?;
        }
        let staged = tempfile::Builder::new()
            .prefix(".pull-")
            .suffix(".part")
            .tempfile_in(dest.parent().unwrap_or(self.local.root()))
            .or_raise(|| ErrorKind::Storage)?
            .into_temp_path();
        if let Err(err) = durable.download(key, &staged).await {
            tracing::warn!(backend = durable.name(), key = %key.display(), error = %*err, "Durable tier download failed; treating as a miss");
            return Ok(None);
        }
        staged.persist(&dest).or_raise(|| ErrorKind::Storage)?;
        if let Err(err) = durable.touch(key).await {
            tracing::debug!(key = %key.display(), error = %*err, "Could not refresh durable cache entry");
        }
        tracing::debug!(key = %key.display(), "Copied durable cache entry to local tier");
        self.local_info(key).await
    }

    /// Store `source` under `key`: always locally, durably only when the
    /// durable tier does not hold the key yet.
    pub(crate) async fn put(&self, key: &Path, source: &Path) -> Result<FileInfo> {
        self.local.save_file(key, source).await.or_raise(|| ErrorKind::Storage)?;
        self.put_durable(key, source).await;
        self.local.stat(key).await.or_raise(|| ErrorKind::Storage)
    }

    pub(crate) async fn put_durable(&self, key: &Path, source: &Path) {
        let Some(durable) = &self.durable else {
            return;
        };
        if self.durable_has(key).await {
            return;
        }
        match durable.save_file(key, source).await {
            Ok(()) => tracing::debug!(backend = durable.name(), key = %key.display(), "Stored in durable tier"),
            Err(err) => {
                tracing::warn!(backend = durable.name(), key = %key.display(), error = %*err, "Durable tier write failed")
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uade_storage::backend::MockBackend;

    fn local_names(local: &LocalBackend) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(local.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_pull_persists_into_local_tier() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalBackend::new("local", dir.path().join("cache")).unwrap();
        let durable = Arc::new(MockBackend::with_files([("abc.flac", b"fLaCremote".to_vec())]));
        let tiers = Tiers {
            local: local.clone(),
            durable: Some(durable as BackendHandle),
        };

        let info = tiers.pull(Path::new("abc.flac")).await.unwrap().unwrap();
        assert_eq!(info.size, 10);
        assert_eq!(std::fs::read(local.root().join("abc.flac")).unwrap(), b"fLaCremote");
        // A second pull replaces the entry in place.
        tiers.pull(Path::new("abc.flac")).await.unwrap().unwrap();
        assert_eq!(local_names(&local), vec!["abc.flac".to_string()]);
    }

    #[tokio::test]
    async fn test_pull_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalBackend::new("local", dir.path().join("cache")).unwrap();
        let tiers = Tiers {
            local: local.clone(),
            durable: Some(Arc::new(MockBackend::default()) as BackendHandle),
        };
        assert_eq!(tiers.pull(Path::new("abc.wav")).await.unwrap(), None);
        assert!(local_names(&local).is_empty());
    }
}
