//! JSON snapshot adapter.

use crate::ContentSource;
use crate::error::{ErrorKind, Result};
use crate::models::{Attachment, Author, ContentType, Entity, SiteInfo, Status, Taxonomy, Term};
use async_trait::async_trait;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use time::Date;

/// A point-in-time export of everything the enumerator and asset collector
/// ask the CMS for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub site: Option<SiteInfo>,
    #[serde(default)]
    pub content_types: Vec<ContentType>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub taxonomies: Vec<Taxonomy>,
    #[serde(default)]
    pub terms: Vec<Term>,
    #[serde(default)]
    pub authors: Vec<Author>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// [`ContentSource`] backed by an in-memory [`Snapshot`].
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    site: SiteInfo,
    snapshot: Snapshot,
    attachments: HashMap<u64, Attachment>,
}
impl SnapshotSource {
    /// Read and parse a snapshot file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.or_raise(|| ErrorKind::Unreadable(path.to_path_buf()))?;
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).or_raise(|| ErrorKind::Malformed(path.to_path_buf()))?;
        tracing::debug!(
            path = %path.display(),
            entities = snapshot.entities.len(),
            terms = snapshot.terms.len(),
            "Loaded content snapshot"
        );
        Self::new(snapshot)
    }

    pub fn new(snapshot: Snapshot) -> Result<Self> {
        let Some(site) = snapshot.site.clone() else {
            exn::bail!(ErrorKind::Invalid("missing `site` section".to_string()));
        };
        if site.posts_per_page == 0 {
            exn::bail!(ErrorKind::Invalid("`posts_per_page` must be at least 1".to_string()));
        }
        let mut seen = HashSet::new();
        for entity in &snapshot.entities {
            if !seen.insert(entity.id) {
                exn::bail!(ErrorKind::Invalid(format!("duplicate entity id {}", entity.id)));
            }
        }
        let attachments = snapshot.attachments.iter().map(|a| (a.id, a.clone())).collect();
        Ok(Self { site, snapshot, attachments })
    }
}

#[async_trait]
impl ContentSource for SnapshotSource {
    async fn site(&self) -> Result<SiteInfo> {
        Ok(self.site.clone())
    }

    async fn content_types(&self) -> Result<Vec<ContentType>> {
        Ok(self.snapshot.content_types.clone())
    }

    async fn published(&self, content_type: &str) -> Result<Vec<Entity>> {
        let mut entities: Vec<Entity> = self
            .snapshot
            .entities
            .iter()
            .filter(|e| e.content_type == content_type && e.status == Status::Publish)
            .cloned()
            .collect();
        entities.sort_by_key(|e| e.id);
        Ok(entities)
    }

    async fn taxonomies(&self) -> Result<Vec<Taxonomy>> {
        Ok(self.snapshot.taxonomies.clone())
    }

    async fn terms(&self, taxonomy: &str) -> Result<Vec<Term>> {
        Ok(self.snapshot.terms.iter().filter(|t| t.taxonomy == taxonomy).cloned().collect())
    }

    async fn authors(&self) -> Result<Vec<Author>> {
        Ok(self.snapshot.authors.iter().filter(|a| a.post_count > 0).cloned().collect())
    }

    async fn date_buckets(&self) -> Result<Vec<Date>> {
        let days: BTreeSet<Date> = self
            .snapshot
            .entities
            .iter()
            .filter(|e| e.content_type == "post" && e.status == Status::Publish)
            .map(|e| e.published.date())
            .collect();
        Ok(days.into_iter().collect())
    }

    async fn attachments(&self, ids: &[u64]) -> Result<Vec<Attachment>> {
        Ok(ids.iter().filter_map(|id| self.attachments.get(id).cloned()).collect())
    }
}
