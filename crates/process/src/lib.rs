//! Bounded execution of the external collaborators (decoder, encoder,
//! archiver).
//!
//! Every invocation goes through [`run`] or [`output`]: argument vectors only,
//! stdin closed, output captured, and a hard time budget after which the
//! child is killed. A timeout is an ordinary error, never a hang.

pub mod error;
mod run;
mod tool;

pub use crate::run::{Finished, output, run};
pub use crate::tool::Tool;
