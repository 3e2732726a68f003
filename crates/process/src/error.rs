//! Process Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::time::Duration;

/// A process error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for process operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// Every variant carries the program name so the message is meaningful on its
/// own once it reaches a user.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The binary could not be located (neither configured nor on `PATH`).
    #[display("{_0} not found on this system")]
    NotFound(#[error(not(source))] String),
    /// The binary exists but the operating system refused to start it.
    #[display("failed to launch {_0}")]
    Spawn(#[error(not(source))] String),
    /// The process did not finish within its time budget and was killed.
    #[display("{program} timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
    /// The process ran to completion but reported failure. `stderr` is the
    /// tool's own diagnostic output, passed through verbatim.
    #[display("{program} failed ({status}): {stderr}")]
    Failed { program: String, status: String, stderr: String },
    /// Reading the process output failed.
    #[display("I/O error while running {_0}")]
    Io(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io(_))
    }

    /// Returns `true` if the failure was the time budget running out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::NotFound("lha".to_string()).to_string(), "lha not found on this system");
        let timeout = ErrorKind::Timeout {
            program: "uade123".to_string(),
            timeout: Duration::from_secs(300),
        };
        assert_eq!(timeout.to_string(), "uade123 timed out after 300s");
        let failed = ErrorKind::Failed {
            program: "flac".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "bad header".to_string(),
        };
        assert_eq!(failed.to_string(), "flac failed (exit status: 1): bad header");
    }

    #[test]
    fn error_kind_retryable() {
        assert!(!ErrorKind::NotFound("lha".to_string()).is_retryable());
        assert!(ErrorKind::Io("lha".to_string()).is_retryable());
        assert!(
            ErrorKind::Timeout {
                program: "lha".to_string(),
                timeout: Duration::from_secs(1)
            }
            .is_timeout()
        );
    }
}
