//! Fail-closed validation run before a run takes any action.

use crate::error::{ErrorKind, Result};
use crate::settings::{BranchMode, Settings};
use regex::Regex;
use std::path::{Component, Path};
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

regex!(GITHUB_REPO, r"^[A-Za-z0-9_-]{1,100}/[A-Za-z0-9_.-]{1,100}$");
regex!(GITHUB_CLASSIC_TOKEN, r"^(?:ghp|gho|ghu|ghs|ghr)_[A-Za-z0-9_]{36,251}$");
regex!(GITHUB_HEX_TOKEN, r"^[a-f0-9]{40}$");
regex!(GITHUB_FINE_GRAINED_TOKEN, r"^github_pat_[A-Za-z0-9_]{22,}$");
regex!(GITLAB_PROJECT, r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$");
regex!(GITLAB_TOKEN, r"^(?:gl[a-z]+-)?[A-Za-z0-9_.-]+$");
regex!(SIMPLE_BRANCH, r"^[A-Za-z0-9/_-]+$");
regex!(STRICT_BRANCH, r"^[A-Za-z0-9][A-Za-z0-9_\-/]*[A-Za-z0-9]$|^[A-Za-z0-9]$");
regex!(CLOUDFLARE_ACCOUNT, r"^[a-f0-9]{32}$");
regex!(CLOUDFLARE_SCRIPT, r"^[a-z0-9][a-z0-9_-]{0,62}$");
regex!(EXCLUDE_PATTERN, r"^[A-Za-z0-9_\-.*/]+$");

const SYSTEM_DIRS: [&str; 10] = [
    "/etc",
    "/System",
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "C:\\Windows",
    "C:/Windows",
    "C:\\System32",
    "C:/System32",
];
const BRANCH_FORBIDDEN: [&str; 12] = ["..", "//", "@{", "\\", " ", "~", "^", ":", "?", "*", "[", "\0"];
const MAX_EXCLUDE_WILDCARDS: usize = 3;
const MAX_EXCLUDE_DEPTH: usize = 10;
const MAX_PATTERN_LEN: usize = 200;
pub const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 60..=18000;

fn invalid(key: &'static str, reason: impl Into<String>) -> crate::error::Error {
    exn::Exn::from(ErrorKind::Invalid(key, reason.into()))
}

/// The strict branch-name check applied before any git command is built.
pub fn is_safe_branch_name(name: &str) -> bool {
    name.len() <= 255
        && STRICT_BRANCH.is_match(name)
        && !BRANCH_FORBIDDEN.iter().any(|bad| name.contains(bad))
        && !name.ends_with(".lock")
}

fn is_github_token(token: &str) -> bool {
    (20..=255).contains(&token.len())
        && (GITHUB_CLASSIC_TOKEN.is_match(token)
            || GITHUB_HEX_TOKEN.is_match(token)
            || GITHUB_FINE_GRAINED_TOKEN.is_match(token))
}

fn is_gitlab_token(token: &str) -> bool {
    (10..=255).contains(&token.len()) && GITLAB_TOKEN.is_match(token)
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    let windows_drive = bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && matches!(bytes[2], b'/' | b'\\');
    path.starts_with('/') || windows_drive
}

/// Checks shared by every filesystem destination.
///
/// The path must be absolute, free of `..`, outside the system directories,
/// and must not reach anywhere else through a symlink: the canonical form of
/// its deepest existing ancestor has to be a prefix of the path as given.
pub fn check_target_path(key: &'static str, path: &Path) -> Result<()> {
    let text = path.to_string_lossy();
    if !is_absolute(&text) {
        return Err(invalid(key, "must be an absolute path"));
    }
    if text.contains("..") {
        return Err(invalid(key, "must not contain `..`"));
    }
    let lowered = text.to_lowercase();
    if SYSTEM_DIRS.iter().any(|dir| lowered.starts_with(&dir.to_lowercase())) {
        return Err(invalid(key, "must not be inside a system directory"));
    }
    let existing = path.ancestors().find(|a| !a.as_os_str().is_empty() && a.exists());
    if let Some(existing) = existing
        && let Ok(real) = existing.canonicalize()
        && !path.starts_with(&real)
    {
        return Err(invalid(key, format!("resolves through a symlink to {}", real.display())));
    }
    Ok(())
}

fn check_branch(key: &'static str, branch: &str) -> Result<()> {
    if branch.is_empty() {
        return Err(invalid(key, "is required"));
    }
    if !SIMPLE_BRANCH.is_match(branch) {
        return Err(invalid(key, "may only contain letters, digits, `/`, `_` and `-`"));
    }
    Ok(())
}

impl Settings {
    /// Validate everything a run depends on. The first problem found is
    /// returned; nothing is touched on failure.
    pub fn validate(&self) -> Result<()> {
        if self.site.home_url.is_empty() {
            return Err(invalid("site.home_url", "is required"));
        }
        for (key, value) in [("site.home_url", self.site.home_url.as_str()), ("site.site_url", self.site.site_url())] {
            match url::Url::parse(value) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => {},
                _ => return Err(invalid(key, "must be an http(s) URL")),
            }
        }
        if !self.publish.any_enabled() {
            return Err(invalid("publish", "enable at least one destination"));
        }
        if !TIMEOUT_RANGE.contains(&self.generate.timeout) {
            return Err(invalid("generate.timeout", "must be between 60 and 18000 seconds"));
        }
        self.validate_include_paths()?;
        self.validate_exclude_patterns()?;

        let publish = &self.publish;
        if publish.local.enabled {
            let Some(path) = &publish.local.path else {
                return Err(invalid("publish.local.path", "is required"));
            };
            check_target_path("publish.local.path", path)?;
        }
        if publish.archive.enabled {
            let Some(path) = &publish.archive.path else {
                return Err(invalid("publish.archive.path", "is required"));
            };
            check_target_path("publish.archive.path", path)?;
        }
        if publish.git_local.enabled {
            let Some(dir) = &publish.git_local.work_dir else {
                return Err(invalid("publish.git_local.work_dir", "is required"));
            };
            check_target_path("publish.git_local.work_dir", dir)?;
            if !dir.is_dir() {
                return Err(invalid("publish.git_local.work_dir", "must be an existing directory"));
            }
            check_branch("publish.git_local.branch", &publish.git_local.branch)?;
            if !is_safe_branch_name(&publish.git_local.branch) {
                return Err(invalid("publish.git_local.branch", "is not a safe git branch name"));
            }
        }
        if publish.github.enabled {
            let github = &publish.github;
            if github.token.is_empty() {
                return Err(invalid("publish.github.token", "is required"));
            }
            if !is_github_token(github.token.expose()) {
                return Err(invalid("publish.github.token", "does not look like a GitHub token"));
            }
            if !GITHUB_REPO.is_match(&github.repo) {
                return Err(invalid("publish.github.repo", "must look like `owner/name`"));
            }
            check_branch("publish.github.branch", &github.branch)?;
            if let (BranchMode::New, Some(base)) = (github.branch_mode, &github.base_branch) {
                check_branch("publish.github.base_branch", base)?;
            }
        }
        if publish.gitlab.enabled {
            let gitlab = &publish.gitlab;
            if gitlab.token.is_empty() {
                return Err(invalid("publish.gitlab.token", "is required"));
            }
            if !is_gitlab_token(gitlab.token.expose()) {
                return Err(invalid("publish.gitlab.token", "does not look like a GitLab token"));
            }
            if !GITLAB_PROJECT.is_match(&gitlab.project) {
                return Err(invalid("publish.gitlab.project", "must look like `namespace/name`"));
            }
            check_branch("publish.gitlab.branch", &gitlab.branch)?;
            if let (BranchMode::New, Some(base)) = (gitlab.branch_mode, &gitlab.base_branch) {
                check_branch("publish.gitlab.base_branch", base)?;
            }
            if url::Url::parse(&gitlab.api_url).is_err() {
                return Err(invalid("publish.gitlab.api_url", "must be a URL"));
            }
        }
        if publish.cloudflare.enabled {
            let cloudflare = &publish.cloudflare;
            if cloudflare.api_token.is_empty() {
                return Err(invalid("publish.cloudflare.api_token", "is required"));
            }
            if !CLOUDFLARE_ACCOUNT.is_match(&cloudflare.account_id) {
                return Err(invalid("publish.cloudflare.account_id", "must be 32 lowercase hex characters"));
            }
            if !CLOUDFLARE_SCRIPT.is_match(&cloudflare.script_name) {
                return Err(invalid(
                    "publish.cloudflare.script_name",
                    "must start with a lowercase letter or digit and use only `a-z0-9_-` (63 max)",
                ));
            }
        }
        Ok(())
    }

    fn validate_include_paths(&self) -> Result<()> {
        for path in self.generate.include_paths.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            if path.contains("..") {
                return Err(invalid("generate.include_paths", format!("`{path}` must not contain `..`")));
            }
            if path.contains(['<', '>', '"', '|', '?', '*']) {
                return Err(invalid("generate.include_paths", format!("`{path}` contains a forbidden character")));
            }
        }
        Ok(())
    }

    fn validate_exclude_patterns(&self) -> Result<()> {
        for pattern in self.generate.exclude_patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            let reason = if pattern.contains("..") {
                "must not contain `..`"
            } else if !EXCLUDE_PATTERN.is_match(pattern) {
                "may only contain letters, digits, `_`, `-`, `.`, `*` and `/`"
            } else if pattern.matches('*').count() > MAX_EXCLUDE_WILDCARDS {
                "may contain at most three `*`"
            } else if pattern.matches('/').count() > MAX_EXCLUDE_DEPTH {
                "is nested too deeply"
            } else if pattern.len() > MAX_PATTERN_LEN {
                "is too long"
            } else {
                continue;
            };
            return Err(invalid("generate.exclude_patterns", format!("`{pattern}` {reason}")));
        }
        Ok(())
    }
}

/// True when `path` is relative and stays below its base: no root, prefix
/// or `..` components.
pub fn is_contained_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
