//! Archive inspection: recognise LHA and ZIP containers by their magic
//! bytes, unpack them, and pick a single playable module out of the result.

mod container;
pub mod error;
mod inspect;
mod tags;

pub use crate::container::Container;
pub use crate::inspect::{Extracted, Inspector, ZipLimits};
pub use crate::tags::{MODULE_TAGS, PAIRED_DATA_TAG, PAIRED_SAMPLE_TAG, is_module_name, sample_companion_name};
