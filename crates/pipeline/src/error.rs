//! Pipeline Error Types
//!
//! Failures of the collaborating crates are folded into one taxonomy here,
//! so the HTTP layer can map a single kind to a status code. The underlying
//! error stays in the tree as a child frame.

use derive_more::{Display, Error};
use uade_archive::error::ErrorKind as ArchiveErrorKind;
use uade_decoder::ErrorKind as DecoderErrorKind;
use uade_fetch::ErrorKind as FetchErrorKind;

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The module to convert is not inside the staging area.
    #[display("illegal module path")]
    IllegalPath,
    /// A conversion was requested before anything was staged.
    #[display("no module file provided")]
    NothingStaged,
    #[display("{_0}")]
    Fetch(#[error(not(source))] FetchErrorKind),
    #[display("{_0}")]
    Archive(#[error(not(source))] ArchiveErrorKind),
    #[display("conversion failed: {_0}")]
    Decode(#[error(not(source))] DecoderErrorKind),
    #[display("conversion cache unavailable")]
    Cache,
    #[display("staging error: {_0}")]
    Staging(#[error(not(source))] String),
}

impl ErrorKind {
    #[track_caller]
    pub fn fetch(err: uade_fetch::Error) -> Error {
        let kind = Self::Fetch((*err).clone());
        err.raise(kind)
    }

    #[track_caller]
    pub fn archive(err: uade_archive::error::Error) -> Error {
        let kind = Self::Archive((*err).clone());
        err.raise(kind)
    }

    #[track_caller]
    pub fn decode(err: uade_decoder::Error) -> Error {
        let kind = Self::Decode((*err).clone());
        err.raise(kind)
    }

    /// Whether the client sent something unusable (bad URL, illegal path,
    /// oversize input), as opposed to the conversion failing.
    pub fn is_input_error(&self) -> bool {
        match self {
            Self::IllegalPath | Self::NothingStaged => true,
            Self::Fetch(kind) => kind.is_input_error(),
            Self::Archive(kind) => kind.is_input_error(),
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(kind) => kind.is_retryable(),
            Self::Archive(kind) => kind.is_retryable(),
            Self::Decode(kind) => kind.is_retryable(),
            Self::Cache => true,
            _ => false,
        }
    }
}
