//! Companion samples of two-part modules.
//!
//! TFMX and similar formats split a tune into `mdat.*` (patterns) and
//! `smpl.*` (samples). Once both halves have been seen together, the sample
//! is kept in the cache tiers and indexed by the fingerprint of the module
//! half, so an upload of the module alone can still be played.

use crate::cache::ConversionCache;
use crate::db::Database;
use crate::error::{ErrorKind, Result};
use crate::tiers::Tiers;
use crate::Fingerprint;
use exn::{OptionExt, ResultExt};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::instrument;
use uade_storage::StorageBackend;

const SAMPLE_PREFIX: &str = "samples";

#[derive(Debug, sqlx::FromRow)]
struct SampleRow {
    sample_key: String,
    sample_name: String,
}

#[derive(Clone)]
pub struct SampleIndex {
    pool: SqlitePool,
    tiers: Tiers,
}

impl std::fmt::Debug for SampleIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleIndex").finish_non_exhaustive()
    }
}

impl SampleIndex {
    /// Samples are stored in the same tiers as `cache`.
    pub fn new(db: &Database, cache: &ConversionCache) -> Self {
        Self {
            pool: db.pool().clone(),
            tiers: cache.tiers().clone(),
        }
    }

    /// Storage key of the sample belonging to `module`.
    pub fn key(module: &Fingerprint) -> PathBuf {
        Path::new(SAMPLE_PREFIX).join(format!("{module}.smpl"))
    }

    /// Keep `sample` and remember that it belongs to the module with
    /// fingerprint `module`.
    #[instrument(skip(self, sample), fields(module = %module))]
    pub async fn remember(&self, module: &Fingerprint, sample: &Path) -> Result<()> {
        let name = sample
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_raise(|| ErrorKind::InvalidData("sample file name"))?;
        let key = Self::key(module);
        self.tiers.put(&key, sample).await?;
        let key_str = key.to_str().ok_or_raise(|| ErrorKind::InvalidData("sample key"))?;
        sqlx::query(include_str!("../queries/upsert_sample.sql"))
            .bind(module.as_str())
            .bind(key_str)
            .bind(name)
            .bind(OffsetDateTime::now_utc().unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tracing::info!(sample = name, "Remembered companion sample");
        Ok(())
    }

    /// Copy the remembered sample for `module` to `dest`. Two-part players
    /// pair the halves by file name, so the caller picks the name.
    ///
    /// Returns `None` when no sample is known, or when it has since been
    /// swept from both tiers (the stale row is then dropped).
    #[instrument(skip(self, dest), fields(module = %module))]
    pub async fn recall(&self, module: &Fingerprint, dest: &Path) -> Result<Option<PathBuf>> {
        let row: Option<SampleRow> = sqlx::query_as(include_str!("../queries/get_sample.sql"))
            .bind(module.as_str())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let key = PathBuf::from(&row.sample_key);
        let present = match self.tiers.local_info(&key).await? {
            Some(_) => true,
            None => self.tiers.pull(&key).await?.is_some(),
        };
        if !present {
            tracing::info!("Remembered sample has been swept; forgetting it");
            self.forget(module).await?;
            return Ok(None);
        }
        self.tiers.touch_local(&key).await;
        self.tiers.local.download(&key, dest).await.or_raise(|| ErrorKind::Storage)?;
        tracing::debug!(sample = %row.sample_name, dest = %dest.display(), "Recalled companion sample");
        Ok(Some(dest.to_path_buf()))
    }

    async fn forget(&self, module: &Fingerprint) -> Result<()> {
        sqlx::query(include_str!("../queries/delete_sample.sql"))
            .bind(module.as_str())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::fingerprint;
    use std::sync::Arc;
    use uade_storage::BackendHandle;
    use uade_storage::backend::{LocalBackend, MockBackend};

    async fn index(dir: &Path, durable: Option<BackendHandle>) -> SampleIndex {
        let local = LocalBackend::new("local", dir.join("cache")).unwrap();
        let cache = ConversionCache::new(local, durable, None);
        SampleIndex::new(&Database::connect_in_memory().await.unwrap(), &cache)
    }

    #[tokio::test]
    async fn test_remember_then_recall() {
        let dir = tempfile::tempdir().unwrap();
        let index = index(dir.path(), None).await;
        let sample = dir.path().join("smpl.Storm");
        std::fs::write(&sample, b"sample bytes").unwrap();
        index.remember(&fingerprint(), &sample).await.unwrap();

        let staging = dir.path().join("staging");
        std::fs::create_dir(&staging).unwrap();
        let dest = staging.join("smpl.storm");
        let recalled = index.recall(&fingerprint(), &dest).await.unwrap().unwrap();
        assert_eq!(recalled, dest);
        assert_eq!(std::fs::read(&recalled).unwrap(), b"sample bytes");
    }

    #[tokio::test]
    async fn test_recall_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let index = index(dir.path(), None).await;
        assert_eq!(index.recall(&fingerprint(), &dir.path().join("smpl.x")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_swept_sample_is_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let index = index(dir.path(), None).await;
        let sample = dir.path().join("smpl.Storm");
        std::fs::write(&sample, b"sample bytes").unwrap();
        index.remember(&fingerprint(), &sample).await.unwrap();
        index.tiers.local.delete(&SampleIndex::key(&fingerprint())).await.unwrap();

        assert_eq!(index.recall(&fingerprint(), &dir.path().join("smpl.x")).await.unwrap(), None);
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM samples").fetch_one(&index.pool).await.unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn test_recall_from_durable_tier() {
        let dir = tempfile::tempdir().unwrap();
        let durable = Arc::new(MockBackend::default());
        let index = index(dir.path(), Some(durable.clone() as BackendHandle)).await;
        let sample = dir.path().join("smpl.Storm");
        std::fs::write(&sample, b"sample bytes").unwrap();
        index.remember(&fingerprint(), &sample).await.unwrap();
        assert!(durable.exists(&SampleIndex::key(&fingerprint())).await.unwrap());
        index.tiers.local.delete(&SampleIndex::key(&fingerprint())).await.unwrap();

        let recalled = index.recall(&fingerprint(), &dir.path().join("smpl.copy")).await.unwrap().unwrap();
        assert_eq!(std::fs::read(&recalled).unwrap(), b"sample bytes");
    }
}
