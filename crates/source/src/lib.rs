//! The content source a run enumerates pages from.
//!
//! The CMS that owns posts, terms and users is an external collaborator. All
//! the pipeline needs from it is a handful of bulk queries, expressed by
//! [`ContentSource`]. [`SnapshotSource`] answers them from a JSON export.

pub mod error;
pub mod models;
mod snapshot;

pub use crate::snapshot::{Snapshot, SnapshotSource};
use crate::error::Result;
use crate::models::{Attachment, Author, ContentType, Entity, SiteInfo, Taxonomy, Term};
use async_trait::async_trait;
use std::sync::Arc;
use time::Date;

pub type SourceHandle = Arc<dyn ContentSource + Send + Sync>;

/// Bulk queries against the CMS.
///
/// Every listing method returns the complete set in one call so that callers
/// never have to issue one lookup per item.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Site-wide settings: base URLs, page size, theme and customizer media.
    async fn site(&self) -> Result<SiteInfo>;

    /// Every registered content type, public or not.
    async fn content_types(&self) -> Result<Vec<ContentType>>;

    /// Published entities of one content type, ascending by id.
    async fn published(&self, content_type: &str) -> Result<Vec<Entity>>;

    /// Every registered taxonomy.
    async fn taxonomies(&self) -> Result<Vec<Taxonomy>>;

    /// Terms of one taxonomy with their published item counts.
    async fn terms(&self, taxonomy: &str) -> Result<Vec<Term>>;

    /// Users with at least one published post.
    async fn authors(&self) -> Result<Vec<Author>>;

    /// Distinct calendar days on which posts were published, ascending.
    async fn date_buckets(&self) -> Result<Vec<Date>>;

    /// Attachment records for the given ids. Unknown ids are skipped.
    async fn attachments(&self, ids: &[u64]) -> Result<Vec<Attachment>>;

    /// Canonical address of an entity.
    fn permalink(&self, entity: &Entity) -> String {
        entity.url.clone()
    }
}
