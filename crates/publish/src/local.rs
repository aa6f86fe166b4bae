//! A plain copy of the staged tree into a directory on this machine.

use crate::error::{ErrorKind, Result};
use crate::pacing::ensure_running;
use crate::{PublishContext, PublishReport, Publisher, read_staged, staged_files};
use async_trait::async_trait;
use exn::ResultExt;
use std::path::PathBuf;
use stillpress_config::Destination;
use stillpress_storage::StorageBackend;
use stillpress_storage::backend::LocalBackend;

/// Replaces the contents of `root` with the staged tree.
pub struct LocalPublisher {
    root: PathBuf,
}
impl LocalPublisher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Publisher for LocalPublisher {
    fn destination(&self) -> Destination {
        Destination::Local
    }

    #[tracing::instrument(skip_all, fields(root = %self.root.display()))]
    async fn publish(&self, tree: &LocalBackend, ctx: &PublishContext<'_>) -> Result<PublishReport> {
        let target = LocalBackend::new("local", &self.root).or_raise(|| ErrorKind::Io(self.root.clone()))?;
        let removed = target.clear_except(&[]).await.or_raise(|| ErrorKind::Io(self.root.clone()))?;
        tracing::debug!(removed, "Cleared previous output");

        let mut report = PublishReport::new(Destination::Local);
        for file in staged_files(tree).await? {
            ensure_running(ctx.cancel)?;
            let content = read_staged(tree, &file).await?;
            target.write(&file.path, &content).await.or_raise(|| ErrorKind::Io(self.root.join(&file.path)))?;
            report.uploaded += 1;
        }
        report.batches = 1;
        ctx.sink.info(&format!("{}: copied {} files to {}", Destination::Local, report.uploaded, self.root.display()));
        Ok(report)
    }
}
