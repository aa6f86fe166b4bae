//! The staging root and everything written into it.

use crate::error::{ErrorKind, Result};
use crate::exclude::Pattern;
use crate::include::IncludeRoots;
use exn::ResultExt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stillpress_assets::{CopyPlan, CopyPolicy};
use stillpress_journal::LogSink;
use stillpress_storage::backend::LocalBackend;
use stillpress_storage::{BackendHandle, FileInfo, StorageBackend, to_slash};
use stillpress_transform::{AssetKind, BaseUrls, convert_asset, url_to_path};
use tracing::instrument;

/// Name of the staging directory inside the state directory.
pub const STAGING_DIR: &str = "staging";

/// How a batch of copies went. Failures have already been logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub copied: usize,
    /// Stylesheets and scripts whose text was rewritten on the way.
    pub converted: usize,
    pub failed: usize,
}

/// How an exclusion pass went. Skipped files have already been logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExcludeReport {
    pub removed: u64,
    pub skipped: u64,
}

/// Removes the staging root when dropped, unless disarmed.
struct RemoveOnDrop(Option<PathBuf>);
impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let Some(root) = self.0.take() else {
            return;
        };
        match std::fs::remove_dir_all(&root) {
            Ok(()) => tracing::debug!(root = %root.display(), "Removed staging root on drop"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => tracing::error!(root = %root.display(), error = %e, "Could not remove staging root"),
        }
    }
}

/// One run's output tree.
///
/// The directory is exclusive to the run that created it. It is removed by
/// [`cleanup`](Self::cleanup), and failing that when the value is dropped,
/// so no exit path leaves it behind.
pub struct Staging {
    backend: LocalBackend,
    guard: RemoveOnDrop,
}
impl Staging {
    /// Create a fresh staging root at `<state_dir>/staging`, removing any
    /// stale one an aborted run left behind.
    #[instrument(skip_all, fields(state_dir = %state_dir.display()))]
    pub async fn create(state_dir: &Path) -> Result<Self> {
        let root = state_dir.join(STAGING_DIR);
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => tracing::warn!(root = %root.display(), "Removed stale staging root"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e).or_raise(|| ErrorKind::Io(root)),
        }
        let backend = LocalBackend::new("staging", &root).or_raise(|| ErrorKind::Io(root.clone()))?;
        Ok(Self { backend, guard: RemoveOnDrop(Some(root)) })
    }

    pub fn root(&self) -> &Path {
        self.backend.root()
    }

    pub fn backend(&self) -> &LocalBackend {
        &self.backend
    }

    pub fn handle(&self) -> BackendHandle {
        Arc::new(self.backend.clone())
    }

    /// Every staged file.
    pub async fn files(&self) -> Result<Vec<FileInfo>> {
        self.backend.list(None).await.or_raise(|| ErrorKind::Io(self.root().to_path_buf()))
    }

    /// Write a transformed page under the path derived from its URL,
    /// returning that path.
    pub async fn write_page(&self, url: &str, body: &[u8]) -> Result<String> {
        let path = url_to_path(url).or_raise(|| ErrorKind::Unmappable(url.to_string()))?;
        self.backend.write(Path::new(&path), body).await.or_raise(|| ErrorKind::Io(PathBuf::from(&path)))?;
        Ok(path)
    }

    /// An empty `robots.txt` at the root.
    pub async fn write_robots_txt(&self) -> Result<()> {
        self.backend.write(Path::new("robots.txt"), b"").await.or_raise(|| ErrorKind::Io(PathBuf::from("robots.txt")))
    }

    /// Carry out a copy plan from the site tree.
    ///
    /// With `bases` given, stylesheets and scripts have their absolute site
    /// URLs rewritten. A file that fails is logged and skipped.
    #[instrument(skip_all, fields(files = plan.len()))]
    pub async fn copy_assets(
        &self,
        plan: &CopyPlan,
        site: &dyn StorageBackend,
        bases: Option<&BaseUrls>,
        sink: &dyn LogSink,
    ) -> CopyReport {
        let mut report = CopyReport::default();
        for entry in plan.entries() {
            let result = match site.read(&entry.source).await {
                Ok(data) => self.write_converted(&entry.dest, data, bases).await,
                Err(e) => Err(e).or_raise(|| ErrorKind::Io(entry.source.clone())),
            };
            match result {
                Ok(converted) => {
                    report.copied += 1;
                    report.converted += usize::from(converted);
                },
                Err(e) => {
                    report.failed += 1;
                    sink.error(&format!("Could not copy {}: {}", to_slash(&entry.source), e.deref()));
                },
            }
        }
        report
    }

    /// Write `data` to `dest`, rewriting it first when it is a stylesheet or
    /// script and `bases` is given. Returns whether it was rewritten.
    async fn write_converted(&self, dest: &Path, data: Vec<u8>, bases: Option<&BaseUrls>) -> Result<bool> {
        let slash = to_slash(dest);
        let converted = match (bases, AssetKind::from_path(&slash)) {
            (Some(bases), Some(kind)) => match std::str::from_utf8(&data) {
                Ok(text) => Some(convert_asset(text, kind, bases)),
                Err(_) => {
                    tracing::debug!(path = %slash, "Copying non-UTF-8 asset unchanged");
                    None
                },
            },
            _ => None,
        };
        match converted {
            Some(text) => {
                self.write(dest, text.as_bytes()).await?;
                Ok(true)
            },
            None => {
                self.write(dest, &data).await?;
                Ok(false)
            },
        }
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.backend.write(path, data).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))
    }

    /// Copy user-supplied files and directories into the root, each under
    /// its own base name.
    ///
    /// A path failing its safety checks is logged as an error and nothing is
    /// copied for it. Directory contents go through `policy` and, with
    /// `bases` given, the same text rewriting as other assets.
    #[instrument(skip_all, fields(paths = paths.len()))]
    pub async fn include(
        &self,
        paths: &[PathBuf],
        roots: &IncludeRoots,
        policy: &CopyPolicy,
        bases: Option<&BaseUrls>,
        sink: &dyn LogSink,
    ) -> CopyReport {
        let mut report = CopyReport::default();
        for path in paths {
            let canonical = match roots.check(path).await {
                Ok(canonical) => canonical,
                Err(e) => {
                    report.failed += 1;
                    sink.error(&format!("Skipping include: {}", e.deref()));
                    continue;
                },
            };
            let Some(name) = canonical.file_name().map(PathBuf::from) else {
                continue;
            };
            let outcome = if canonical.is_dir() {
                self.include_dir(&canonical, &name, policy, bases, sink).await
            } else {
                match tokio::fs::read(&canonical).await {
                    Ok(data) => self.write_converted(&name, data, bases).await.map(|c| CopyReport {
                        copied: 1,
                        converted: usize::from(c),
                        failed: 0,
                    }),
                    Err(e) => Err(e).or_raise(|| ErrorKind::Io(canonical.clone())),
                }
            };
            match outcome {
                Ok(r) => {
                    report.copied += r.copied;
                    report.converted += r.converted;
                    report.failed += r.failed;
                },
                Err(e) => {
                    report.failed += 1;
                    sink.error(&format!("Could not include {}: {}", path.display(), e.deref()));
                },
            }
        }
        report
    }

    async fn include_dir(
        &self,
        dir: &Path,
        name: &Path,
        policy: &CopyPolicy,
        bases: Option<&BaseUrls>,
        sink: &dyn LogSink,
    ) -> Result<CopyReport> {
        let source = LocalBackend::open("include", dir).or_raise(|| ErrorKind::Io(dir.to_path_buf()))?;
        let files = source.list(None).await.or_raise(|| ErrorKind::Io(dir.to_path_buf()))?;
        let mut report = CopyReport::default();
        for file in files.into_iter().filter(|f| policy.allows(&f.path)) {
            let dest = name.join(&file.path);
            let result = match source.read(&file.path).await {
                Ok(data) => self.write_converted(&dest, data, bases).await,
                Err(e) => Err(e).or_raise(|| ErrorKind::Io(dir.join(&file.path))),
            };
            match result {
                Ok(converted) => {
                    report.copied += 1;
                    report.converted += usize::from(converted);
                },
                Err(e) => {
                    report.failed += 1;
                    sink.error(&format!("Could not include {}: {}", dir.join(&file.path).display(), e.deref()));
                },
            }
        }
        Ok(report)
    }

    /// Remove every staged file covered by one of `patterns`. A file that
    /// can't be removed is logged as a warning and skipped.
    #[instrument(skip_all, fields(patterns = patterns.len()))]
    pub async fn exclude(&self, patterns: &[Pattern], sink: &dyn LogSink) -> Result<ExcludeReport> {
        let files = self.files().await?;
        Ok(self.remove_covered(files, patterns, sink).await)
    }

    async fn remove_covered(&self, files: Vec<FileInfo>, patterns: &[Pattern], sink: &dyn LogSink) -> ExcludeReport {
        let mut report = ExcludeReport::default();
        for file in files {
            let slash = file.slash_path();
            let Some(pattern) = patterns.iter().find(|p| p.covers(&slash)) else {
                continue;
            };
            tracing::debug!(path = %slash, pattern = pattern.as_str(), "Excluding staged file");
            match self.backend.delete(&file.path).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    report.skipped += 1;
                    sink.warning(&format!("Could not exclude {slash}: {}", e.deref()));
                },
            }
        }
        report
    }

    /// Remove the staging root now.
    pub async fn cleanup(mut self) -> Result<()> {
        let Some(root) = self.guard.0.take() else {
            return Ok(());
        };
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {
                tracing::debug!(root = %root.display(), "Removed staging root");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                // Leave the guard armed so drop gets another go.
                self.guard.0 = Some(root.clone());
                Err(e).or_raise(|| ErrorKind::Io(root))
            },
        }
    }
}
