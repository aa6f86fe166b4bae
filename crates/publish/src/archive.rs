//! A zip of the staged tree, named after the run's start time.

use crate::error::{ErrorKind, Result};
use crate::{PublishContext, PublishReport, Publisher, staged_files, timestamp};
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use stillpress_config::Destination;
use stillpress_storage::backend::LocalBackend;
use time::OffsetDateTime;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Writes `static-output-<timestamp>.zip` into a directory.
pub struct ArchivePublisher {
    dir: PathBuf,
}
impl ArchivePublisher {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn archive_path(&self, started_at: OffsetDateTime) -> PathBuf {
        self.dir.join(format!("static-output-{}.zip", timestamp(started_at)))
    }
}

/// Blocking: compress `paths` (relative to `root`) into `target`.
fn write_archive(root: &Path, paths: &[String], target: &Path) -> Result<u64> {
    let file = File::create(target).or_raise(|| ErrorKind::Archive(target.to_path_buf()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));
    for path in paths {
        let source = root.join(path);
        let content = std::fs::read(&source).or_raise(|| ErrorKind::Io(source.clone()))?;
        zip.start_file(path.as_str(), options).or_raise(|| ErrorKind::Archive(target.to_path_buf()))?;
        zip.write_all(&content).or_raise(|| ErrorKind::Archive(target.to_path_buf()))?;
    }
    let mut writer = zip.finish().or_raise(|| ErrorKind::Archive(target.to_path_buf()))?;
    writer.flush().or_raise(|| ErrorKind::Archive(target.to_path_buf()))?;
    drop(writer);
    let size = std::fs::metadata(target).or_raise(|| ErrorKind::Archive(target.to_path_buf()))?.len();
    Ok(size)
}

#[async_trait]
impl Publisher for ArchivePublisher {
    fn destination(&self) -> Destination {
        Destination::Archive
    }

    #[tracing::instrument(skip_all, fields(dir = %self.dir.display()))]
    async fn publish(&self, tree: &LocalBackend, ctx: &PublishContext<'_>) -> Result<PublishReport> {
        tokio::fs::create_dir_all(&self.dir).await.or_raise(|| ErrorKind::Io(self.dir.clone()))?;
        let paths: Vec<String> = staged_files(tree).await?.iter().map(|f| f.slash_path()).collect();
        let target = self.archive_path(ctx.started_at);
        let root = tree.root().to_path_buf();

        let count = paths.len();
        let destination = target.clone();
        let size = tokio::task::spawn_blocking(move || write_archive(&root, &paths, &destination))
            .await
            .or_raise(|| ErrorKind::Archive(target.clone()))??;

        let mut report = PublishReport::new(Destination::Archive);
        report.uploaded = count;
        report.batches = 1;
        let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        ctx.sink.info(&format!(
            "{}: wrote {name} ({count} files, {:.2} MB)",
            Destination::Archive,
            size as f64 / 1024.0 / 1024.0
        ));
        Ok(report)
    }
}
