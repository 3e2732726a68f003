//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Durable-tier failures never show up here: they degrade to a miss (or a
/// skipped copy) and are logged instead.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The local tier could not be read or written.
    #[display("cache storage error")]
    Storage,
    #[display("invalid fingerprint: {_0}")]
    InvalidFingerprint(#[error(not(source))] String),
    #[display("I/O error while hashing: {_0}")]
    Io(#[error(not(source))] String),
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    #[display("invalid cache data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Io(_) | Self::Database)
    }
}
