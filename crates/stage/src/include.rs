//! Safety checks for user-supplied include paths.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use stillpress_assets::Layout;
use tokio::fs;

/// Where extra include paths may be taken from.
///
/// Every check runs on canonical paths, so a symlink pointing out of the
/// site or into a protected directory is caught.
#[derive(Debug, Clone)]
pub struct IncludeRoots {
    allowed: Vec<PathBuf>,
    protected: Vec<PathBuf>,
}
impl IncludeRoots {
    /// Paths must resolve inside the site root or the content dir, and never
    /// under `wp-admin`, the includes dir, `plugins` or `mu-plugins`.
    pub async fn new(site_root: &Path, layout: &Layout) -> Result<Self> {
        let root = fs::canonicalize(site_root).await.or_raise(|| ErrorKind::Io(site_root.to_path_buf()))?;
        let content = site_root.join(&layout.content_dir);
        let mut allowed = vec![root];
        allowed.extend(fs::canonicalize(&content).await.ok());
        let mut protected = Vec::new();
        for dir in [
            site_root.join("wp-admin"),
            site_root.join(&layout.includes_dir),
            content.join("plugins"),
            content.join("mu-plugins"),
        ] {
            protected.extend(fs::canonicalize(&dir).await.ok());
        }
        Ok(Self { allowed, protected })
    }

    /// The canonical form of `path` if it may be included.
    pub async fn check(&self, path: &Path) -> Result<PathBuf> {
        let lossy = path.to_string_lossy();
        if lossy.contains("..") || lossy.contains('\0') {
            exn::bail!(ErrorKind::Rejected(path.to_path_buf(), "contains a traversal sequence"));
        }
        let Ok(canonical) = fs::canonicalize(path).await else {
            exn::bail!(ErrorKind::Rejected(path.to_path_buf(), "does not exist"));
        };
        if !self.allowed.iter().any(|root| canonical.starts_with(root)) {
            exn::bail!(ErrorKind::Rejected(path.to_path_buf(), "outside the site"));
        }
        if self.protected.iter().any(|dir| canonical.starts_with(dir)) {
            exn::bail!(ErrorKind::Rejected(path.to_path_buf(), "inside a protected directory"));
        }
        Ok(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["wp-admin", "wp-includes/js", "wp-content/plugins/x", "wp-content/extra", "downloads"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        std::fs::write(dir.path().join("downloads/a.pdf"), "pdf").unwrap();
        std::fs::write(dir.path().join("wp-includes/js/a.js"), "js").unwrap();
        dir
    }

    fn rejection(err: crate::error::Error) -> &'static str {
        match &*err {
            ErrorKind::Rejected(_, reason) => *reason,
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_allowed_paths() {
        let site = site();
        let roots = IncludeRoots::new(site.path(), &Layout::default()).await.unwrap();
        let checked = roots.check(&site.path().join("downloads/a.pdf")).await.unwrap();
        assert!(checked.ends_with("downloads/a.pdf"));
        roots.check(&site.path().join("wp-content/extra")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_paths() {
        let site = site();
        let outside = tempfile::tempdir().unwrap();
        let roots = IncludeRoots::new(site.path(), &Layout::default()).await.unwrap();
        let check = |p: PathBuf| {
            let roots = roots.clone();
            async move { rejection(roots.check(&p).await.unwrap_err()) }
        };
        assert_eq!(check(site.path().join("downloads/../wp-admin")).await, "contains a traversal sequence");
        assert_eq!(check(site.path().join("missing")).await, "does not exist");
        assert_eq!(check(outside.path().to_path_buf()).await, "outside the site");
        assert_eq!(check(site.path().join("wp-admin")).await, "inside a protected directory");
        assert_eq!(check(site.path().join("wp-includes/js/a.js")).await, "inside a protected directory");
        assert_eq!(check(site.path().join("wp-content/plugins/x")).await, "inside a protected directory");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_rejected() {
        let site = site();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), site.path().join("downloads/escape")).unwrap();
        let roots = IncludeRoots::new(site.path(), &Layout::default()).await.unwrap();
        let err = roots.check(&site.path().join("downloads/escape")).await.unwrap_err();
        assert_eq!(rejection(err), "outside the site");
    }
}
