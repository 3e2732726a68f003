use crate::staging::StagingArea;
use futures::TryStreamExt;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::instrument;
use uade_storage::{BackendHandle, FileInfo};

/// Counters from one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for SweepStats {
    fn add_assign(&mut self, other: Self) {
        self.scanned += other.scanned;
        self.deleted += other.deleted;
        self.failed += other.failed;
    }
}

/// Deletes entries that have not been written or touched within their
/// retention window.
#[derive(Clone, Default)]
pub struct Sweeper {
    targets: Vec<(BackendHandle, Duration)>,
    staging: Option<(StagingArea, Duration)>,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let targets: Vec<_> = self.targets.iter().map(|(b, age)| (b.name().to_string(), *age)).collect();
        f.debug_struct("Sweeper")
            .field("targets", &targets)
            .field("staging", &self.staging.as_ref().map(|(s, age)| (s.root(), *age)))
            .finish()
    }
}

impl Sweeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, backend: BackendHandle, max_age: Duration) -> Self {
        self.targets.push((backend, max_age));
        self
    }

    /// Also remove request directories abandoned in the staging area (a
    /// crashed or killed process never runs their cleanup).
    pub fn staging(mut self, staging: StagingArea, max_age: Duration) -> Self {
        self.staging = Some((staging, max_age));
        self
    }

    /// One pass over every target. Failures are logged and counted; a
    /// target that cannot be listed is skipped.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> SweepStats {
        let now = OffsetDateTime::now_utc();
        let mut total = SweepStats::default();
        for (backend, max_age) in &self.targets {
            let stats = sweep_backend(backend, *max_age, now).await;
            tracing::debug!(backend = backend.name(), ?stats, "Swept backend");
            total += stats;
        }
        if let Some((staging, max_age)) = &self.staging {
            total += sweep_staging(staging, *max_age, now).await;
        }
        if total.deleted > 0 || total.failed > 0 {
            tracing::info!(scanned = total.scanned, deleted = total.deleted, failed = total.failed, "Retention sweep finished");
        }
        total
    }

    /// Sweep every `interval` until the handle is aborted. The first pass
    /// runs immediately.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

async fn sweep_backend(backend: &BackendHandle, max_age: Duration, now: OffsetDateTime) -> SweepStats {
    let mut stats = SweepStats::default();
    let mut entries = backend.list_stream(None);
    loop {
        let info = match entries.try_next().await {
            Ok(Some(info)) => info,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(backend = backend.name(), error = %*err, "Listing failed; skipping the rest of this backend");
                stats.failed += 1;
                break;
            },
        };
        stats.scanned += 1;
        if !info.is_older_than(max_age, now) {
            continue;
        }
        match backend.delete(&info.path).await {
            Ok(()) => {
                tracing::debug!(backend = backend.name(), path = %info.path.display(), "Deleted expired entry");
                stats.deleted += 1;
            },
            // Someone else got there first.
            Err(err) if err.is_not_found() => {},
            Err(err) => {
                tracing::warn!(backend = backend.name(), path = %info.path.display(), error = %*err, "Could not delete expired entry");
                stats.failed += 1;
            },
        }
    }
    stats
}

async fn sweep_staging(staging: &StagingArea, max_age: Duration, now: OffsetDateTime) -> SweepStats {
    let mut stats = SweepStats::default();
    let mut entries = match tokio::fs::read_dir(staging.root()).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(root = %staging.root().display(), error = %err, "Could not list staging area");
            stats.failed += 1;
            return stats;
        },
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if !name.to_str().is_some_and(StagingArea::is_request_dir) {
            continue;
        }
        let Ok(modified) = entry.metadata().await.and_then(|meta| meta.modified()) else {
            continue;
        };
        stats.scanned += 1;
        if !FileInfo::new(name, 0, modified).is_older_than(max_age, now) {
            continue;
        }
        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => stats.deleted += 1,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), error = %err, "Could not remove stale staging directory");
                stats.failed += 1;
            },
        }
    }
    stats
}
