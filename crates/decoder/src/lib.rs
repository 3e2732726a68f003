//! The two black-box collaborators of a conversion: a module decoder that
//! renders to WAV and an encoder that compresses WAV to FLAC.
//!
//! Both sit behind traits so the pipeline and cache can be exercised with
//! in-process fakes.

pub mod error;
mod flac;
mod uade;

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::flac::Flac;
pub use crate::uade::{DEFAULT_PLAYER_LABEL, Uade, parse_player_name};

use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait Decoder: Send + Sync {
    /// Name of the replayer that would handle `module`. Best effort: any
    /// failure yields [`DEFAULT_PLAYER_LABEL`].
    async fn probe(&self, module: &Path) -> String;

    /// Render `module` to a WAV file at `output`.
    async fn decode(&self, module: &Path, output: &Path) -> Result<()>;
}

#[async_trait]
pub trait Encoder: Send + Sync {
    /// Compress the WAV at `input` into a FLAC file at `output`.
    async fn encode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Fail with [`ErrorKind::OutputMissing`] unless `path` is a non-empty file.
pub(crate) async fn require_output(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => exn::bail!(ErrorKind::OutputMissing),
    }
}
