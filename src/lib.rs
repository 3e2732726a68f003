//! HTTP front end of the UADE web player.
//!
//! Modules arrive as uploads, URLs or built-in examples, are rendered to
//! audio by [`uade_pipeline`], and are published under a random id for
//! playback with byte-range support.

pub mod api;
pub mod error;
pub mod logging;
pub mod routes;
pub mod serve;
pub mod state;

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::routes::router;
pub use crate::state::{AppState, Components};
