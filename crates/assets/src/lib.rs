//! Reference-driven asset collection.
//!
//! A snapshot needs more than its pages: the active theme, the media the
//! content shows, the plugin and runtime files the pages load. Rather than
//! copying whole directories, [`Collector`] scans the staged pages and the
//! stylesheets they pull in, and plans only the files actually referenced.

mod collect;
mod consts;
pub mod error;
pub mod scan;

pub use crate::collect::{Collector, CopyPlan, CopyPolicy, Group, Layout, PlannedCopy};
