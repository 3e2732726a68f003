//! Storage Error Types
//!
//! Both cache tiers and the published artifact store report through this
//! one taxonomy, whatever the backend.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No object under this key. Callers treat it as a cache miss.
    #[display("no such object: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    #[display("access denied: {}", _0.display())]
    Denied(#[error(not(source))] PathBuf),
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// The remote tier could not be reached.
    #[display("storage unreachable: {_0}")]
    Unreachable(#[error(not(source))] String),
    /// Key is empty or climbs out of the storage root.
    #[display("invalid key: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    #[display("invalid storage location: {_0}")]
    InvalidLocation(#[error(not(source))] String),
    #[display("backend failure: {_0}")]
    Backend(#[error(not(source))] String),
}

impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// A transient failure; the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unreachable(_) | Self::Backend(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
