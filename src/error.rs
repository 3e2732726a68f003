//! Startup Error Types
//!
//! Failures while assembling the server from its configuration. Request
//! failures never reach this type; they become an [`ApiError`](crate::api::ApiError).

use derive_more::{Display, Error};

/// A startup error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for startup operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("storage unavailable: {_0}")]
    Storage(#[error(not(source))] String),
    #[display("sample index unavailable")]
    Database,
    #[display("staging area unavailable")]
    Staging,
    #[display("could not listen on {_0}")]
    Bind(#[error(not(source))] String),
    #[display("server terminated unexpectedly")]
    Serve,
}
