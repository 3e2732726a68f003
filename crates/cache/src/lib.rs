//! Content-addressed cache of decoded modules.
//!
//! Conversions are keyed by a [`Fingerprint`] of their input and stored as
//! `{fingerprint}.wav` or `{fingerprint}.flac` in two tiers:
//! - a **local** directory, always present, that every hit is served from;
//! - an optional **durable** backend (S3 or a mounted directory) shared
//!   between instances, copied into the local tier on demand.
//!
//! A separate SQLite [`SampleIndex`] remembers the companion sample of
//! two-part modules.

mod cache;
mod db;
pub mod error;
mod fingerprint;
mod models;
mod samples;
mod tiers;

pub use crate::cache::ConversionCache;
pub use crate::db::Database;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::fingerprint::Fingerprint;
pub use crate::models::{Artifact, AudioFormat, Tier};
pub use crate::samples::SampleIndex;
