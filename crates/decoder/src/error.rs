//! Decoder Error Types

use derive_more::{Display, Error};
use std::time::Duration;
use uade_process::error::ErrorKind as ProcessErrorKind;

/// A decoder error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for decode and encode operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("{_0} is not available on this system")]
    ToolMissing(#[error(not(source))] String),
    /// The tool rejected the input. Carries its own diagnostic, which is
    /// what a user needs to see ("unknown format", "bad header", ...).
    #[display("{_0}")]
    Failed(#[error(not(source))] String),
    #[display("timed out after {}s", _0.as_secs())]
    Timeout(#[error(not(source))] Duration),
    /// The tool exited successfully but wrote nothing.
    #[display("output file not created")]
    OutputMissing,
    #[display("I/O error: {_0}")]
    Io(#[error(not(source))] String),
}

impl ErrorKind {
    /// Fold a subprocess failure into a decoder error, keeping the process
    /// frame as a child of the error tree.
    #[track_caller]
    pub fn process(err: uade_process::error::Error) -> Error {
        let kind = match &*err {
            ProcessErrorKind::NotFound(tool) | ProcessErrorKind::Spawn(tool) => Self::ToolMissing(tool.clone()),
            ProcessErrorKind::Timeout { timeout, .. } => Self::Timeout(*timeout),
            ProcessErrorKind::Failed { stderr, .. } => Self::Failed(stderr.clone()),
            ProcessErrorKind::Io(program) => Self::Io(program.clone()),
        };
        err.raise(kind)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io(_))
    }
}
