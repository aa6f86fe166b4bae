//! Publishers take a finished staging tree somewhere else.
//!
//! Local destinations copy or archive it. Remote git hosts share one
//! diff-then-batch-commit algorithm ([`host::publish_to_host`]) driven
//! through the [`GitHost`] capability trait, so unchanged files are never
//! uploaded twice. The edge-compute target uses its own manifest and upload
//! session protocol.

mod archive;
mod blobs;
mod cloudflare;
pub mod error;
mod git_local;
mod github;
mod gitlab;
pub mod hash;
pub mod host;
mod http;
mod local;
mod pacing;

pub use crate::archive::ArchivePublisher;
pub use crate::cloudflare::CloudflarePublisher;
pub use crate::git_local::{GitLocalPublisher, sanitize_git_output};
pub use crate::github::GitHubPublisher;
pub use crate::gitlab::GitLabPublisher;
pub use crate::host::{GitHost, Head, Manifest};
pub use crate::local::LocalPublisher;
pub use crate::pacing::Pacing;

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use stillpress_config::{Destination, Settings};
use stillpress_journal::LogSink;
use stillpress_storage::backend::LocalBackend;
use stillpress_storage::{FileInfo, StorageBackend};
use time::OffsetDateTime;
use time::macros::format_description;
use tokio_util::sync::CancellationToken;

/// What one destination did with the staged tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub destination: Destination,
    /// Files written, uploaded or committed.
    pub uploaded: usize,
    /// Files the destination already had.
    pub skipped: usize,
    /// Commits, upload buckets or archive files produced.
    pub batches: usize,
}
impl PublishReport {
    pub fn new(destination: Destination) -> Self {
        Self { destination, uploaded: 0, skipped: 0, batches: 0 }
    }
}

/// Everything a publisher needs besides the tree itself.
pub struct PublishContext<'a> {
    /// Commit message; batch counters are appended where needed.
    pub message: &'a str,
    /// Run start, used for archive names and deploy dates.
    pub started_at: OffsetDateTime,
    pub sink: &'a dyn LogSink,
    pub cancel: &'a CancellationToken,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    fn destination(&self) -> Destination;

    /// Publish everything in `tree`.
    async fn publish(&self, tree: &LocalBackend, ctx: &PublishContext<'_>) -> Result<PublishReport>;

    /// Confirm the credentials work, returning who or what they reach.
    /// Destinations without credentials have nothing to check.
    async fn check(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

/// `YYYYmmdd_HHMMSS`, as used in default commit messages and archive names.
pub fn timestamp(at: OffsetDateTime) -> String {
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    at.format(&format).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// The configured message, or `update:<timestamp>` when none is set.
pub fn commit_message(configured: &str, at: OffsetDateTime) -> String {
    match configured.trim() {
        "" => format!("update:{}", timestamp(at)),
        message => message.to_string(),
    }
}

/// Publisher for one enabled destination.
pub fn build(destination: Destination, settings: &Settings) -> Result<Box<dyn Publisher>> {
    let pacing = Pacing::from(&settings.tuning);
    let publish = &settings.publish;
    Ok(match destination {
        Destination::Local => Box::new(LocalPublisher::new(required(&publish.local.path, "publish.local.path")?)),
        Destination::Archive => Box::new(ArchivePublisher::new(required(&publish.archive.path, "publish.archive.path")?)),
        Destination::GitLocal => Box::new(GitLocalPublisher::new(&publish.git_local)?),
        Destination::GitHub => Box::new(GitHubPublisher::new(&publish.github, pacing)?),
        Destination::GitLab => Box::new(GitLabPublisher::new(&publish.gitlab, pacing)?),
        Destination::Cloudflare => Box::new(CloudflarePublisher::new(&publish.cloudflare, pacing)?),
    })
}

fn required<T: Clone>(value: &Option<T>, key: &'static str) -> Result<T> {
    value.clone().ok_or_else(|| exn::Exn::from(ErrorKind::Misconfigured(key)))
}

/// Every staged file, in path order.
pub(crate) async fn staged_files(tree: &LocalBackend) -> Result<Vec<FileInfo>> {
    let mut files = tree.list(None).await.or_raise(|| ErrorKind::Io(tree.root().to_path_buf()))?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

pub(crate) async fn read_staged(tree: &LocalBackend, file: &FileInfo) -> Result<Vec<u8>> {
    tree.read(&file.path).await.or_raise(|| ErrorKind::Io(file.path.clone()))
}
