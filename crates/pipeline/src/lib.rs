//! From request to audio: per-request staging, the conversion state
//! machine, and the retention sweeper that keeps scratch space bounded.

pub mod error;
mod orchestrator;
mod staging;
mod sweeper;

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::orchestrator::{Conversion, Orchestrator};
pub use crate::staging::{StagedInput, StagingArea};
pub use crate::sweeper::{SweepStats, Sweeper};
