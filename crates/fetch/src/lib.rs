//! Guarded downloads of user-supplied module URLs.
//!
//! Every URL, including each redirect target, passes through [`UrlGuard`]
//! before a connection is made, and connections are pinned to the addresses
//! the guard approved.

pub mod error;
mod fetcher;
mod guard;
mod ip;
mod sanitize;

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::fetcher::{Fetched, Fetcher};
pub use crate::guard::{Resolve, SafeUrl, SystemResolver, UrlGuard};
pub use crate::ip::is_public;
pub use crate::sanitize::{sanitize_filename, sanitize_for_log};
