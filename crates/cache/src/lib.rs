//! SQLite page cache.
//!
//! Rendered page bodies are kept between runs so unchanged content does not
//! have to be fetched from the live site again. Entries are keyed by a
//! BLAKE3 hash of the full URL and remember which content entity (if any) the
//! page was rendered from, so that an edit to that entity invalidates the
//! entry. The cache is never the source of truth: deleting the database only
//! costs a slower next run.

mod db;
pub mod error;
mod models;
mod store;

pub use crate::db::Database;
pub use crate::models::{CacheStats, CachedPage, SourceRef};
pub use crate::store::{PageCache, cache_key};
