//! Commit the staged tree into a git working copy on this machine, and
//! optionally push it.

use crate::error::{ErrorKind, Result};
use crate::pacing::ensure_running;
use crate::{PublishContext, PublishReport, Publisher, read_staged, staged_files};
use async_trait::async_trait;
use exn::ResultExt;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use stillpress_config::{Destination, GitLocalTarget, is_safe_branch_name};
use stillpress_storage::StorageBackend;
use stillpress_storage::backend::LocalBackend;
use tokio::process::Command;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

regex!(REMOTE_CREDENTIALS, r"https?://[^@\s]+@\S+");
regex!(UNIX_PATH, r#"(^|[\s'"(=])/[^\s:'"]+"#);
regex!(WINDOWS_PATH, r"(?i)[A-Z]:\\[^\s:]+");
regex!(IP_ADDRESS, r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}");

/// Only binaries resolving into these directories are run.
const ALLOWED_GIT_DIRS: [&str; 4] = ["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin", "/opt/local/bin"];

/// Strip paths, embedded credentials and addresses from git output before
/// it reaches the journal.
pub fn sanitize_git_output(output: &str) -> String {
    let message = REMOTE_CREDENTIALS.replace_all(output.trim(), "https://[credentials]@[remote]");
    let message = UNIX_PATH.replace_all(&message, "${1}[path]");
    let message = WINDOWS_PATH.replace_all(&message, "[path]");
    IP_ADDRESS.replace_all(&message, "[ip]").into_owned()
}

/// A canonical path is acceptable when it names `git` and sits in one of the
/// allowed directories.
fn is_allowed_git(canonical: &Path) -> bool {
    canonical.file_name().is_some_and(|name| name == "git")
        && canonical.parent().is_some_and(|dir| ALLOWED_GIT_DIRS.iter().any(|allowed| dir.starts_with(allowed)))
}

fn locate_git() -> Result<PathBuf> {
    let candidates = which::which("git").into_iter().chain(ALLOWED_GIT_DIRS.iter().map(|d| Path::new(d).join("git")));
    for candidate in candidates {
        let Ok(canonical) = candidate.canonicalize() else {
            continue;
        };
        if canonical.is_file() && is_allowed_git(&canonical) {
            return Ok(canonical);
        }
        tracing::debug!(candidate = %candidate.display(), "Rejected git candidate");
    }
    exn::bail!(ErrorKind::GitNotFound)
}

struct Git {
    binary: PathBuf,
    work_dir: PathBuf,
}
impl Git {
    /// Run one subcommand. Returns whether it exited cleanly and its combined
    /// output.
    async fn run(&self, args: &[&str]) -> Result<(bool, String)> {
        tracing::trace!(?args, "Running git");
        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.work_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await
            .or_raise(|| ErrorKind::Io(self.binary.clone()))?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), text))
    }

    /// Run a subcommand that has to succeed.
    async fn must(&self, step: &'static str, args: &[&str]) -> Result<String> {
        match self.run(args).await? {
            (true, output) => Ok(output),
            (false, output) => exn::bail!(ErrorKind::Git(step, sanitize_git_output(&output))),
        }
    }
}

/// Publishes into an existing local working copy.
pub struct GitLocalPublisher {
    work_dir: PathBuf,
    branch: String,
    push: bool,
}
impl GitLocalPublisher {
    pub fn new(target: &GitLocalTarget) -> Result<Self> {
        let Some(work_dir) = target.work_dir.clone() else {
            exn::bail!(ErrorKind::Misconfigured("publish.git_local.work_dir"));
        };
        if !is_safe_branch_name(&target.branch) {
            exn::bail!(ErrorKind::Misconfigured("publish.git_local.branch"));
        }
        Ok(Self { work_dir, branch: target.branch.clone(), push: target.push })
    }

    /// Replace everything but `.git` with the staged tree.
    async fn replace_contents(&self, tree: &LocalBackend, ctx: &PublishContext<'_>) -> Result<usize> {
        let target = LocalBackend::open("git-local", &self.work_dir).or_raise(|| ErrorKind::Io(self.work_dir.clone()))?;
        target.clear_except(&[".git"]).await.or_raise(|| ErrorKind::Io(self.work_dir.clone()))?;
        let files = staged_files(tree).await?;
        for file in &files {
            ensure_running(ctx.cancel)?;
            let content = read_staged(tree, file).await?;
            target.write(&file.path, &content).await.or_raise(|| ErrorKind::Io(self.work_dir.join(&file.path)))?;
        }
        Ok(files.len())
    }

    async fn switch_branch(&self, git: &Git) -> Result<()> {
        let branch = self.branch.as_str();
        let current = git.run(&["branch", "--show-current"]).await?.1;
        if current.trim() == branch {
            return Ok(());
        }
        if git.run(&["rev-parse", "--verify", "--quiet", branch]).await?.0 {
            git.must("checkout", &["checkout", branch]).await?;
        } else if git.run(&["rev-parse", "--verify", "--quiet", "HEAD"]).await?.0 {
            git.must("checkout", &["checkout", "-b", branch]).await?;
        } else {
            git.must("checkout", &["checkout", "--orphan", branch]).await?;
        }
        Ok(())
    }
}

fn nothing_to_commit(output: &str) -> bool {
    output.contains("nothing to commit") || output.contains("nothing added to commit")
}

#[async_trait]
impl Publisher for GitLocalPublisher {
    fn destination(&self) -> Destination {
        Destination::GitLocal
    }

    #[tracing::instrument(skip_all, fields(work_dir = %self.work_dir.display(), branch = %self.branch))]
    async fn publish(&self, tree: &LocalBackend, ctx: &PublishContext<'_>) -> Result<PublishReport> {
        if !self.work_dir.join(".git").is_dir() {
            exn::bail!(ErrorKind::NotARepository(self.work_dir.clone()));
        }
        let git = Git { binary: locate_git()?, work_dir: self.work_dir.clone() };

        // Switch first so the copied files land on the target branch.
        self.switch_branch(&git).await?;
        let mut report = PublishReport::new(Destination::GitLocal);
        report.uploaded = self.replace_contents(tree, ctx).await?;
        git.must("add", &["add", "-A"]).await?;

        match git.run(&["commit", "-m", ctx.message]).await? {
            (true, _) => report.batches = 1,
            (false, output) if nothing_to_commit(&output) => {
                ctx.sink.info(&format!("{}: no changes", Destination::GitLocal));
                return Ok(report);
            },
            (false, output) => exn::bail!(ErrorKind::Git("commit", sanitize_git_output(&output))),
        }

        let mut pushed = "";
        if self.push {
            ensure_running(ctx.cancel)?;
            match git.run(&["push", "origin", &self.branch]).await? {
                (true, _) => pushed = ", pushed",
                (false, output) => ctx.sink.error(&format!(
                    "{}: push to origin failed: {}",
                    Destination::GitLocal,
                    sanitize_git_output(&output)
                )),
            }
        }
        ctx.sink.info(&format!("{}: committed to {}{pushed}", Destination::GitLocal, self.branch));
        Ok(report)
    }
}
