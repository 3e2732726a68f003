//! Storage models.

use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;

/// File metadata returned by storage backends.
///
/// This represents information about a file in storage, used for listing
/// operations and retention sweeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified (or last touched) timestamp
    pub modified: OffsetDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: impl Into<OffsetDateTime>) -> Self {
        Self {
            path: path.into(),
            size,
            modified: modified.into(),
        }
    }

    /// Whether the file was last modified more than `max_age` before `now`.
    ///
    /// Timestamps in the future (clock skew between tiers) never count as
    /// expired.
    pub fn is_older_than(&self, max_age: Duration, now: OffsetDateTime) -> bool {
        let age = now - self.modified;
        age.is_positive() && age.unsigned_abs() > max_age
    }
}
