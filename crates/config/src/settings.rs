//! The settings tree, one struct per TOML section.

use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use stillpress_crawl::{BasicAuth, Coverage};
use stillpress_transform::{ArchiveToggles, UrlMode};

/// A credential. Serializes as the plain value but never shows up in debug
/// output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);
impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.is_empty() {
            true => f.write_str("Secret(<empty>)"),
            false => f.write_str("Secret(***)"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub site: Site,
    pub generate: Generate,
    pub archives: Coverage,
    pub assets: Assets,
    pub publish: Publish,
    pub tuning: Tuning,
    pub state: State,
}
impl Settings {
    pub fn archive_toggles(&self) -> ArchiveToggles {
        ArchiveToggles { tags: self.archives.tags, dates: self.archives.dates, authors: self.archives.authors }
    }

    /// The directory holding the cache database, journal, run state, lock
    /// and staging root.
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.state.dir {
            return Ok(dir.clone());
        }
        match crate::project_dirs() {
            Some(dirs) => Ok(dirs.data_dir().to_path_buf()),
            None => exn::bail!(ErrorKind::NoStateDir),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Site {
    pub home_url: String,
    /// Where the CMS itself lives, when it differs from `home_url`.
    pub site_url: Option<String>,
    /// Filesystem root of the site installation.
    pub root: Option<PathBuf>,
    pub content_dir: String,
    pub includes_dir: String,
    /// Content snapshot exported from the CMS.
    pub source: Option<PathBuf>,
}
impl Default for Site {
    fn default() -> Self {
        Self {
            home_url: String::new(),
            site_url: None,
            root: None,
            content_dir: "wp-content".to_string(),
            includes_dir: "wp-includes".to_string(),
            source: None,
        }
    }
}
impl Site {
    pub fn site_url(&self) -> &str {
        self.site_url.as_deref().unwrap_or(&self.home_url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Generate {
    pub url_mode: UrlMode,
    /// Sequential per-request timeout, in seconds.
    pub timeout: u64,
    pub cache_enabled: bool,
    pub parallel: bool,
    pub concurrency: usize,
    /// Parallel per-request timeout, in seconds.
    pub request_timeout: u64,
    pub batch_size: usize,
    pub basic_auth: Option<BasicAuth>,
    pub robots_txt: bool,
    pub debug: bool,
    pub include_paths: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Empty means a timestamped default.
    pub commit_message: String,
}
impl Default for Generate {
    fn default() -> Self {
        Self {
            url_mode: UrlMode::Relative,
            timeout: 600,
            cache_enabled: true,
            parallel: true,
            concurrency: 5,
            request_timeout: 30,
            batch_size: 10,
            basic_auth: None,
            robots_txt: false,
            debug: false,
            include_paths: Vec::new(),
            exclude_patterns: Vec::new(),
            commit_message: String::new(),
        }
    }
}
impl Generate {
    pub const MIN_REQUEST_TIMEOUT: u64 = 10;

    /// Timeout applying to each page request of the selected strategy.
    pub fn effective_timeout(&self) -> Duration {
        match self.parallel {
            true => Duration::from_secs(self.request_timeout.max(Self::MIN_REQUEST_TIMEOUT)),
            false => Duration::from_secs(self.timeout),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Assets {
    /// Never copied into the output, whatever directory they sit in.
    pub denied_extensions: Vec<String>,
    /// Directories under the content dir copied whole when present.
    pub extra_content_dirs: Vec<String>,
    /// Well-known files copied from the site root when present.
    pub root_icons: Vec<String>,
}
impl Default for Assets {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            denied_extensions: strings(&[
                "php", "php3", "php4", "php5", "php7", "phtml", "phps", "exe", "bat", "sh", "command", "com",
                "htpasswd", "ini", "conf", "config", "sql", "sqlite", "db", "git", "gitignore", "gitmodules", "svn",
                "log", "bak", "backup", "tmp", "temp",
            ]),
            extra_content_dirs: strings(&["cache", "fonts", "w3tc-config"]),
            root_icons: strings(&[
                "apple-touch-icon.png",
                "apple-touch-icon-precomposed.png",
                "browserconfig.xml",
                "manifest.json",
                "site.webmanifest",
            ]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Publish {
    pub local: LocalTarget,
    pub archive: LocalTarget,
    pub git_local: GitLocalTarget,
    pub github: GitHubTarget,
    pub gitlab: GitLabTarget,
    pub cloudflare: CloudflareTarget,
}
impl Publish {
    pub fn any_enabled(&self) -> bool {
        self.local.enabled
            || self.archive.enabled
            || self.git_local.enabled
            || self.github.enabled
            || self.gitlab.enabled
            || self.cloudflare.enabled
    }

    /// Enabled destinations, in the order a run publishes to them.
    pub fn enabled(&self) -> Vec<Destination> {
        [
            (self.local.enabled, Destination::Local),
            (self.github.enabled, Destination::GitHub),
            (self.git_local.enabled, Destination::GitLocal),
            (self.archive.enabled, Destination::Archive),
            (self.cloudflare.enabled, Destination::Cloudflare),
            (self.gitlab.enabled, Destination::GitLab),
        ]
        .into_iter()
        .filter_map(|(on, d)| on.then_some(d))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    #[display("local directory")]
    Local,
    #[display("archive")]
    Archive,
    #[display("local git")]
    GitLocal,
    #[display("GitHub")]
    GitHub,
    #[display("GitLab")]
    GitLab,
    #[display("Cloudflare Workers")]
    Cloudflare,
}

/// A filesystem destination: the output directory, or the directory the
/// archive is written into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalTarget {
    pub enabled: bool,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitLocalTarget {
    pub enabled: bool,
    pub work_dir: Option<PathBuf>,
    pub branch: String,
    pub push: bool,
}
impl Default for GitLocalTarget {
    fn default() -> Self {
        Self { enabled: false, work_dir: None, branch: "main".to_string(), push: false }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchMode {
    /// Publish onto a branch that already exists.
    #[default]
    Existing,
    /// Create the branch from `base_branch` (or the default branch) if needed.
    New,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubTarget {
    pub enabled: bool,
    pub token: Secret,
    /// `owner/name`.
    pub repo: String,
    pub branch_mode: BranchMode,
    pub branch: String,
    pub base_branch: Option<String>,
}
impl Default for GitHubTarget {
    fn default() -> Self {
        Self {
            enabled: false,
            token: Secret::default(),
            repo: String::new(),
            branch_mode: BranchMode::Existing,
            branch: "main".to_string(),
            base_branch: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitLabTarget {
    pub enabled: bool,
    pub token: Secret,
    /// `namespace/name`.
    pub project: String,
    pub branch_mode: BranchMode,
    pub branch: String,
    pub base_branch: Option<String>,
    pub api_url: String,
}
impl Default for GitLabTarget {
    fn default() -> Self {
        Self {
            enabled: false,
            token: Secret::default(),
            project: String::new(),
            branch_mode: BranchMode::Existing,
            branch: "main".to_string(),
            base_branch: None,
            api_url: "https://gitlab.com/api/v4".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudflareTarget {
    pub enabled: bool,
    pub api_token: Secret,
    pub account_id: String,
    pub script_name: String,
}

/// Rate-limit and retry constants for the remote publishers and the run
/// lock. The defaults were tuned against the hosted APIs' limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub upload_batch_size: usize,
    pub github_batch_pause_ms: u64,
    pub gitlab_batch_pause_ms: u64,
    pub blob_concurrency: usize,
    pub blob_chunk_pause_ms: u64,
    pub parallel_backoff_secs: Vec<u64>,
    pub sequential_backoff_secs: Vec<u64>,
    pub rate_limit_cooldown_secs: u64,
    pub cloudflare_bucket_pause_ms: u64,
    pub lock_timeout_secs: u64,
    pub running_flag_ttl_secs: u64,
}
impl Default for Tuning {
    fn default() -> Self {
        Self {
            upload_batch_size: 300,
            github_batch_pause_ms: 2000,
            gitlab_batch_pause_ms: 3000,
            blob_concurrency: 10,
            blob_chunk_pause_ms: 500,
            parallel_backoff_secs: vec![10, 20, 40],
            sequential_backoff_secs: vec![5, 10, 15],
            rate_limit_cooldown_secs: 60,
            cloudflare_bucket_pause_ms: 500,
            lock_timeout_secs: 3600,
            running_flag_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
    pub dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_is_redacted() {
        let target = GitHubTarget { token: Secret::new("ghp_supersecret"), ..Default::default() };
        let debug = format!("{target:?}");
        assert!(!debug.contains("supersecret"));
        assert!(debug.contains("Secret(***)"));
    }

    #[test]
    fn test_enabled_order() {
        let mut publish = Publish::default();
        publish.gitlab.enabled = true;
        publish.local.enabled = true;
        publish.archive.enabled = true;
        assert_eq!(publish.enabled(), vec![Destination::Local, Destination::Archive, Destination::GitLab]);
        assert!(publish.any_enabled());
        assert!(!Publish::default().any_enabled());
    }

    #[test]
    fn test_effective_timeout() {
        let mut generate = Generate { request_timeout: 3, ..Default::default() };
        assert_eq!(generate.effective_timeout(), Duration::from_secs(10));
        generate.parallel = false;
        assert_eq!(generate.effective_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_site_url_falls_back_to_home() {
        let site = Site { home_url: "https://example.com".to_string(), ..Default::default() };
        assert_eq!(site.site_url(), "https://example.com");
    }
}
