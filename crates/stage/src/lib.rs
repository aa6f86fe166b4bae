//! The per-run output tree: pages and assets are written here, include and
//! exclude rules are applied here, and publishers read from here.

pub mod error;
mod exclude;
mod include;
mod staging;

pub use crate::exclude::{Pattern, forced};
pub use crate::include::IncludeRoots;
pub use crate::staging::{CopyReport, ExcludeReport, STAGING_DIR, Staging};
