//! The diff-then-batch-commit protocol shared by the git hosting targets.
//!
//! A host only supplies primitives (existence, branch head, tree manifest,
//! commit a set of files). [`publish_to_host`] does the rest:
//!
//! 1. create the repository when it does not exist;
//! 2. find the branch head, creating the branch or bootstrapping an empty
//!    repository with a placeholder commit when needed;
//! 3. fetch the remote manifest and hash every staged file the way git does;
//! 4. commit only files whose hash differs, in fixed-size batches processed
//!    strictly in order, each batch its own commit.
//!
//! A failed batch aborts the rest. Earlier batches stay committed.

use crate::error::Result;
use crate::hash::git_blob_hash;
use crate::pacing::{ensure_running, pause};
use crate::{PublishContext, PublishReport, read_staged, staged_files};
use async_trait::async_trait;
use std::collections::HashMap;
use std::ops::Deref;
use std::time::Duration;
use stillpress_config::Destination;
use stillpress_storage::FileInfo;
use stillpress_storage::backend::LocalBackend;

/// Remote path to git blob hash.
pub type Manifest = HashMap<String, String>;

/// A branch tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    pub commit: String,
    /// Root tree of `commit`, for hosts that build trees themselves.
    pub tree: Option<String>,
}

/// One file to commit, with its repository path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBlob {
    pub path: String,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait GitHost: Send + Sync {
    fn destination(&self) -> Destination;

    /// Wait between consecutive batch commits.
    fn batch_pause(&self) -> Duration;

    async fn exists(&self) -> Result<bool>;

    /// Create the repository, private.
    async fn create(&self) -> Result<()>;

    /// Tip of the target branch, `None` when the branch does not exist.
    async fn head(&self) -> Result<Option<Head>>;

    /// Create the target branch from its configured source. `None` when the
    /// repository has no commits to branch from.
    async fn create_branch(&self) -> Result<Option<Head>>;

    /// Establish a root commit in an empty repository.
    async fn bootstrap(&self, message: &str) -> Result<Head>;

    /// Every blob reachable from `head`.
    async fn manifest(&self, head: &Head) -> Result<Manifest>;

    /// Commit `files` on top of `head`, returning the new tip. `known` tells
    /// which paths already exist remotely.
    async fn commit(
        &self,
        head: &Head,
        files: Vec<StagedBlob>,
        message: &str,
        known: &Manifest,
        ctx: &PublishContext<'_>,
    ) -> Result<Head>;
}

/// True when `manifest` lacks `path` or holds different content for it.
pub fn is_changed(path: &str, content: &[u8], manifest: &Manifest) -> bool {
    manifest.get(path).is_none_or(|sha| *sha != git_blob_hash(content))
}

/// `message`, with ` (batch i/n)` appended when there is more than one.
pub fn batch_message(message: &str, index: usize, total: usize) -> String {
    match total {
        0 | 1 => message.to_string(),
        _ => format!("{message} (batch {}/{total})", index + 1),
    }
}

/// Publish `tree` to `host`. See the module docs for the protocol.
#[tracing::instrument(skip_all, fields(destination = %host.destination()))]
pub async fn publish_to_host(
    host: &dyn GitHost,
    tree: &LocalBackend,
    ctx: &PublishContext<'_>,
    batch_size: usize,
) -> Result<PublishReport> {
    let mut report = PublishReport::new(host.destination());
    if !host.exists().await? {
        host.create().await?;
        ctx.sink.info(&format!("{}: created repository", host.destination()));
    }

    let mut head = match host.head().await? {
        Some(head) => head,
        None => match host.create_branch().await? {
            Some(head) => {
                ctx.sink.info(&format!("{}: created branch", host.destination()));
                head
            },
            None => {
                ctx.sink.info(&format!("{}: empty repository; creating an initial commit", host.destination()));
                host.bootstrap(ctx.message).await?
            },
        },
    };

    let manifest = match host.manifest(&head).await {
        Ok(manifest) => manifest,
        Err(e) => {
            let destination = host.destination();
            ctx.sink.warning(&format!("{destination}: could not read remote tree, uploading everything: {}", e.deref()));
            Manifest::new()
        },
    };

    let files = staged_files(tree).await?;
    let mut changed: Vec<FileInfo> = Vec::new();
    for file in files.iter() {
        ensure_running(ctx.cancel)?;
        let content = read_staged(tree, file).await?;
        if is_changed(&file.slash_path(), &content, &manifest) {
            changed.push(file.clone());
        }
    }
    report.skipped = files.len() - changed.len();
    if changed.is_empty() {
        ctx.sink.info(&format!("{}: no changes", host.destination()));
        return Ok(report);
    }

    let batches: Vec<&[FileInfo]> = changed.chunks(batch_size.max(1)).collect();
    let total = batches.len();
    tracing::debug!(changed = changed.len(), skipped = report.skipped, batches = total, "Computed upload batches");
    for (index, batch) in batches.into_iter().enumerate() {
        if index > 0 {
            pause(host.batch_pause(), ctx.cancel).await?;
        }
        ensure_running(ctx.cancel)?;
        let mut blobs = Vec::with_capacity(batch.len());
        for file in batch {
            blobs.push(StagedBlob { path: file.slash_path(), content: read_staged(tree, file).await? });
        }
        let message = batch_message(ctx.message, index, total);
        head = host.commit(&head, blobs, &message, &manifest, ctx).await?;
        report.uploaded += batch.len();
        report.batches += 1;
        if total > 1 {
            ctx.sink.debug(&format!("{}: committed batch {}/{total}", host.destination(), index + 1));
        }
    }
    ctx.sink.info(&format!(
        "{}: committed {} changed files ({} unchanged)",
        host.destination(),
        report.uploaded,
        report.skipped
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Mutex;
    use stillpress_journal::{Journal, Level};
    use stillpress_storage::StorageBackend;
    use time::macros::datetime;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Default)]
    struct Repo {
        exists: bool,
        /// Commit id to (message, file tree).
        commits: Vec<(String, BTreeMap<String, Vec<u8>>)>,
        branch: Option<usize>,
        default_branch: Option<usize>,
        created: bool,
        bootstrapped: bool,
    }

    /// A git host held entirely in memory.
    #[derive(Debug, Default)]
    struct MemoryHost {
        repo: Mutex<Repo>,
        fail_commit: Option<usize>,
        fail_manifest: bool,
    }
    impl MemoryHost {
        fn missing() -> Self {
            Self::default()
        }

        fn empty() -> Self {
            Self { repo: Mutex::new(Repo { exists: true, ..Default::default() }), ..Default::default() }
        }

        fn with_branch(files: &[(&str, &str)]) -> Self {
            let tree = files.iter().map(|(p, c)| (p.to_string(), c.as_bytes().to_vec())).collect();
            let repo = Repo {
                exists: true,
                commits: vec![("initial".to_string(), tree)],
                branch: Some(0),
                default_branch: Some(0),
                ..Default::default()
            };
            Self { repo: Mutex::new(repo), ..Default::default() }
        }

        fn messages(&self) -> Vec<String> {
            self.repo.lock().unwrap().commits.iter().map(|(m, _)| m.clone()).collect()
        }

        fn tip(&self) -> BTreeMap<String, Vec<u8>> {
            let repo = self.repo.lock().unwrap();
            repo.branch.map(|i| repo.commits[i].1.clone()).unwrap_or_default()
        }

        fn head_of(index: usize) -> Head {
            Head { commit: format!("c{index}"), tree: Some(format!("t{index}")) }
        }

        fn index_of(head: &Head) -> usize {
            head.commit[1..].parse().unwrap()
        }
    }

    #[async_trait]
    impl GitHost for MemoryHost {
        fn destination(&self) -> Destination {
            Destination::GitHub
        }

        fn batch_pause(&self) -> Duration {
            Duration::ZERO
        }

        async fn exists(&self) -> Result<bool> {
            Ok(self.repo.lock().unwrap().exists)
        }

        async fn create(&self) -> Result<()> {
            let mut repo = self.repo.lock().unwrap();
            repo.exists = true;
            repo.created = true;
            Ok(())
        }

        async fn head(&self) -> Result<Option<Head>> {
            Ok(self.repo.lock().unwrap().branch.map(Self::head_of))
        }

        async fn create_branch(&self) -> Result<Option<Head>> {
            let mut repo = self.repo.lock().unwrap();
            repo.branch = repo.default_branch;
            Ok(repo.branch.map(Self::head_of))
        }

        async fn bootstrap(&self, message: &str) -> Result<Head> {
            let mut repo = self.repo.lock().unwrap();
            let tree = BTreeMap::from([("index.html".to_string(), Vec::new())]);
            repo.commits.push((message.to_string(), tree));
            repo.branch = Some(repo.commits.len() - 1);
            repo.bootstrapped = true;
            Ok(Self::head_of(repo.commits.len() - 1))
        }

        async fn manifest(&self, head: &Head) -> Result<Manifest> {
            if self.fail_manifest {
                exn::bail!(ErrorKind::Api(500, "tree unavailable".to_string()));
            }
            let repo = self.repo.lock().unwrap();
            let tree = &repo.commits[Self::index_of(head)].1;
            Ok(tree.iter().map(|(p, c)| (p.clone(), git_blob_hash(c))).collect())
        }

        async fn commit(
            &self,
            head: &Head,
            files: Vec<StagedBlob>,
            message: &str,
            _: &Manifest,
            _: &PublishContext<'_>,
        ) -> Result<Head> {
            let mut repo = self.repo.lock().unwrap();
            if self.fail_commit == Some(repo.commits.len()) {
                exn::bail!(ErrorKind::Api(422, "Update is not a fast forward".to_string()));
            }
            let mut tree = repo.commits[Self::index_of(head)].1.clone();
            tree.extend(files.into_iter().map(|f| (f.path, f.content)));
            repo.commits.push((message.to_string(), tree));
            repo.branch = Some(repo.commits.len() - 1);
            Ok(Self::head_of(repo.commits.len() - 1))
        }
    }

    async fn staged(files: &[(&str, &str)]) -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let tree = LocalBackend::new("staging", dir.path()).unwrap();
        for (path, content) in files {
            tree.write(Path::new(path), content.as_bytes()).await.unwrap();
        }
        (dir, tree)
    }

    async fn run(host: &MemoryHost, tree: &LocalBackend, batch_size: usize) -> (Result<PublishReport>, Journal) {
        let journal = Journal::in_memory(true);
        let cancel = CancellationToken::new();
        let ctx = PublishContext {
            message: "update",
            started_at: datetime!(2024-01-01 0:00 UTC),
            sink: &journal,
            cancel: &cancel,
        };
        let result = publish_to_host(host, tree, &ctx, batch_size).await;
        (result, journal)
    }

    #[test]
    fn test_is_changed_uses_git_blob_hash() {
        let manifest = Manifest::from([
            ("a.html".to_string(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391".to_string()),
            ("b.html".to_string(), "ce013625030ba8dba906f756967f9e9ca394464a".to_string()),
        ]);
        assert!(!is_changed("a.html", b"", &manifest));
        assert!(!is_changed("b.html", b"hello\n", &manifest));
        assert!(is_changed("b.html", b"hello, world\n", &manifest));
        assert!(is_changed("c.html", b"new", &manifest));
    }

    #[test]
    fn test_batch_message() {
        assert_eq!(batch_message("update", 0, 1), "update");
        assert_eq!(batch_message("update", 1, 3), "update (batch 2/3)");
    }

    #[tokio::test]
    async fn test_only_changed_files_are_committed() {
        let host = MemoryHost::with_branch(&[("index.html", "home"), ("about/index.html", "old about")]);
        let (_dir, tree) =
            staged(&[("index.html", "home"), ("about/index.html", "new about"), ("feed/index.xml", "<rss/>")]).await;
        let (report, _) = run(&host, &tree, 300).await;
        let report = report.unwrap();
        assert_eq!((report.uploaded, report.skipped, report.batches), (2, 1, 1));
        assert_eq!(host.messages(), vec!["initial", "update"]);
        let tip = host.tip();
        assert_eq!(tip["about/index.html"], b"new about");
        assert_eq!(tip["feed/index.xml"], b"<rss/>");
    }

    #[tokio::test]
    async fn test_unchanged_tree_commits_nothing() {
        let host = MemoryHost::with_branch(&[("index.html", "home")]);
        let (_dir, tree) = staged(&[("index.html", "home")]).await;
        let report = run(&host, &tree, 300).await.0.unwrap();
        assert_eq!((report.uploaded, report.skipped, report.batches), (0, 1, 0));
        assert_eq!(host.messages(), vec!["initial"]);
    }

    #[tokio::test]
    async fn test_batches_are_committed_in_order() {
        let host = MemoryHost::with_branch(&[]);
        let (_dir, tree) = staged(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")]).await;
        let report = run(&host, &tree, 2).await.0.unwrap();
        assert_eq!((report.uploaded, report.batches), (5, 3));
        assert_eq!(
            host.messages(),
            vec!["initial", "update (batch 1/3)", "update (batch 2/3)", "update (batch 3/3)"]
        );
        assert_eq!(host.tip().len(), 5);
    }

    #[tokio::test]
    async fn test_failed_batch_aborts_but_keeps_earlier_commits() {
        let mut host = MemoryHost::with_branch(&[]);
        // Commit index 2 is the second batch.
        host.fail_commit = Some(2);
        let (_dir, tree) = staged(&[("a", "1"), ("b", "2"), ("c", "3")]).await;
        let err = run(&host, &tree, 1).await.0.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Api(422, _)));
        assert_eq!(host.messages(), vec!["initial", "update (batch 1/3)"]);
        assert_eq!(host.tip().keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_missing_repository_is_created_and_bootstrapped() {
        let host = MemoryHost::missing();
        let (_dir, tree) = staged(&[("index.html", "home"), ("style.css", "body{}")]).await;
        let report = run(&host, &tree, 300).await.0.unwrap();
        let repo = host.repo.lock().unwrap();
        assert!(repo.created);
        assert!(repo.bootstrapped);
        // The placeholder index.html is empty, so the real one still differs.
        assert_eq!(report.uploaded, 2);
        assert_eq!(repo.commits.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_repository_is_bootstrapped() {
        let host = MemoryHost::empty();
        let (_dir, tree) = staged(&[("index.html", "")]).await;
        let report = run(&host, &tree, 300).await.0.unwrap();
        assert!(host.repo.lock().unwrap().bootstrapped);
        // The staged page matches the placeholder byte for byte.
        assert_eq!((report.uploaded, report.skipped), (0, 1));
    }

    #[tokio::test]
    async fn test_unreadable_manifest_uploads_everything() {
        let mut host = MemoryHost::with_branch(&[("index.html", "home")]);
        host.fail_manifest = true;
        let (_dir, tree) = staged(&[("index.html", "home")]).await;
        let (report, journal) = run(&host, &tree, 300).await;
        assert_eq!(report.unwrap().uploaded, 1);
        assert!(journal.entries().iter().any(|e| e.level == Level::Warning));
    }

    #[tokio::test]
    async fn test_cancelled_before_commit() {
        let host = MemoryHost::with_branch(&[]);
        let (_dir, tree) = staged(&[("a", "1")]).await;
        let journal = Journal::in_memory(false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = PublishContext {
            message: "update",
            started_at: datetime!(2024-01-01 0:00 UTC),
            sink: &journal,
            cancel: &cancel,
        };
        let err = publish_to_host(&host, &tree, &ctx, 300).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert_eq!(host.messages(), vec!["initial"]);
    }
}
