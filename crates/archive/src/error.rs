//! Archive Error Types

use derive_more::{Display, Error};
use std::time::Duration;
use uade_process::error::ErrorKind as ProcessErrorKind;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The archiver needed for this container is not installed.
    #[display("{_0} is not available to extract this archive")]
    ToolMissing(#[error(not(source))] String),
    /// The archive is corrupt or the archiver rejected it. Carries the
    /// archiver's own diagnostic.
    #[display("archive extraction failed: {_0}")]
    ExtractionFailed(#[error(not(source))] String),
    #[display("archive extraction timed out after {}s", _0.as_secs())]
    Timeout(#[error(not(source))] Duration),
    /// Archive exceeds the entry count or uncompressed size ceiling.
    #[display("archive too large: {_0}")]
    TooLarge(#[error(not(source))] String),
    #[display("no music files found in archive")]
    NoMusicFile,
    #[display("I/O error while inspecting archive: {_0}")]
    Io(#[error(not(source))] String),
}

impl ErrorKind {
    /// Fold a subprocess failure of the archiver into an archive error,
    /// keeping the process frame as a child of the error tree.
    #[track_caller]
    pub fn process(err: uade_process::error::Error) -> Error {
        let kind = match &*err {
            ProcessErrorKind::NotFound(tool) | ProcessErrorKind::Spawn(tool) => Self::ToolMissing(tool.clone()),
            ProcessErrorKind::Timeout { timeout, .. } => Self::Timeout(*timeout),
            ProcessErrorKind::Failed { stderr, .. } => Self::ExtractionFailed(stderr.clone()),
            ProcessErrorKind::Io(program) => Self::Io(program.clone()),
        };
        err.raise(kind)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io(_))
    }

    /// Whether the failure is the caller's input (as opposed to the server).
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::TooLarge(_))
    }
}
