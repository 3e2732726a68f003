//! Fetch Error Types

use derive_more::{Display, Error};
use std::time::Duration;

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// URL rejected before any connection was attempted. The reason is safe
    /// to show to the client; it never echoes the raw URL.
    #[display("invalid or unsafe URL: {_0}")]
    Unsafe(#[error(not(source))] String),
    #[display("too many redirects (limit {_0})")]
    TooManyRedirects(#[error(not(source))] usize),
    #[display("remote server responded with HTTP {_0}")]
    Status(#[error(not(source))] u16),
    #[display("download exceeds {_0} bytes")]
    TooLarge(#[error(not(source))] u64),
    #[display("download timed out after {}s", _0.as_secs())]
    Timeout(#[error(not(source))] Duration),
    #[display("download failed: {_0}")]
    Network(#[error(not(source))] String),
    #[display("I/O error while saving download: {_0}")]
    Io(#[error(not(source))] String),
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_))
    }

    /// Whether the failure is the caller's fault (bad URL, oversize file).
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::Unsafe(_) | Self::TooLarge(_))
    }
}
