//! Working out which site files a snapshot needs.

use crate::error::{ErrorKind, Result};
use crate::scan::{attachment_ids, generated_upload, locate, page_references, resolve, stylesheet_references};
use derive_more::Display;
use exn::ResultExt;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use stillpress_source::ContentSource;
use stillpress_source::models::{SiteInfo, Theme};
use stillpress_storage::{BackendHandle, StorageBackend, to_slash, validate_path};
use tracing::instrument;

/// Directory names of the CMS install, relative to the site root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub content_dir: String,
    pub includes_dir: String,
}
impl Default for Layout {
    fn default() -> Self {
        Self { content_dir: "wp-content".to_string(), includes_dir: "wp-includes".to_string() }
    }
}
impl Layout {
    pub fn themes(&self) -> String {
        format!("{}/themes", self.content_dir)
    }

    pub fn uploads(&self) -> String {
        format!("{}/uploads", self.content_dir)
    }

    pub fn plugins(&self) -> String {
        format!("{}/plugins", self.content_dir)
    }
}

/// Which files are never copied, whichever directory they come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CopyPolicy {
    denied_extensions: BTreeSet<String>,
}
impl CopyPolicy {
    pub fn new<S: AsRef<str>>(denied_extensions: impl IntoIterator<Item = S>) -> Self {
        Self { denied_extensions: denied_extensions.into_iter().map(|e| e.as_ref().to_ascii_lowercase()).collect() }
    }

    /// False for a denied extension, or for a path with a dot-prefixed
    /// component other than `.htaccess`.
    pub fn allows(&self, path: &Path) -> bool {
        let hidden = path.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            name.starts_with('.') && name != ".htaccess" && name != "." && name != ".."
        });
        if hidden {
            return false;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => !self.denied_extensions.contains(&ext.to_ascii_lowercase()),
            None => true,
        }
    }
}

/// Where a planned copy came from, for the summary line.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Group {
    #[display("themes")]
    Themes,
    #[display("uploads")]
    Uploads,
    #[display("plugins")]
    Plugins,
    #[display("runtime")]
    Runtime,
    #[display("extra")]
    Extra,
    #[display("icons")]
    Icons,
}

/// One file to copy from the site tree into the staging tree. Both paths are
/// relative to their tree's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCopy {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub group: Group,
}

/// The files a snapshot needs, keyed by destination. The first plan for a
/// destination wins.
#[derive(Debug, Clone, Default)]
pub struct CopyPlan {
    entries: BTreeMap<PathBuf, PlannedCopy>,
}
impl CopyPlan {
    fn add(&mut self, group: Group, source: PathBuf, dest: PathBuf) -> bool {
        if self.entries.contains_key(&dest) {
            return false;
        }
        self.entries.insert(dest.clone(), PlannedCopy { source, dest, group });
        true
    }

    pub fn entries(&self) -> impl Iterator<Item = &PlannedCopy> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, dest: impl AsRef<Path>) -> bool {
        self.entries.contains_key(dest.as_ref())
    }

    /// File counts per group, skipping empty groups.
    pub fn summary(&self) -> BTreeMap<Group, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.group).or_insert(0) += 1;
        }
        counts
    }
}

/// Builds a [`CopyPlan`] by scanning the staged pages for references into
/// the site tree.
///
/// Nothing is copied here. Every lookup against the site tree treats a
/// missing directory or file as "nothing to copy".
pub struct Collector {
    site: BackendHandle,
    layout: Layout,
    policy: CopyPolicy,
    extra_dirs: Vec<String>,
    root_icons: Vec<String>,
}
impl Collector {
    pub fn new(site: BackendHandle, layout: Layout, policy: CopyPolicy) -> Self {
        Self { site, layout, policy, extra_dirs: Vec::new(), root_icons: Vec::new() }
    }

    /// Directories under the content dir that are copied whole.
    pub fn with_extra_dirs(mut self, dirs: impl IntoIterator<Item = String>) -> Self {
        self.extra_dirs = dirs.into_iter().collect();
        self
    }

    /// Files copied from the site root when present.
    pub fn with_root_icons(mut self, icons: impl IntoIterator<Item = String>) -> Self {
        self.root_icons = icons.into_iter().collect();
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn policy(&self) -> &CopyPolicy {
        &self.policy
    }

    /// Plan every asset copy for a run whose pages are already in `staged`.
    #[instrument(skip_all)]
    pub async fn collect(&self, source: &dyn ContentSource, staged: &dyn StorageBackend) -> Result<CopyPlan> {
        let site = source.site().await.or_raise(|| ErrorKind::Source("site"))?;
        let references = self.page_references(staged).await?;
        let mut plan = CopyPlan::default();

        self.themes(&site.theme, &mut plan).await?;
        self.media(source, &site, &mut plan).await?;
        self.generated_uploads(&references, &mut plan).await?;
        self.referenced(&references, &self.layout.plugins(), Group::Plugins, &mut plan).await?;
        self.referenced(&references, &self.layout.includes_dir, Group::Runtime, &mut plan).await?;
        self.extras(source, &mut plan).await?;
        self.icons(source, &site, &mut plan).await?;

        tracing::debug!(files = plan.len(), references = references.len(), "Planned asset copies");
        Ok(plan)
    }

    /// Distinct references across every staged HTML page. A page that can't
    /// be read is skipped.
    async fn page_references(&self, staged: &dyn StorageBackend) -> Result<BTreeSet<String>> {
        let files = staged.list(None).await.or_raise(|| ErrorKind::Storage(staged.name().to_string()))?;
        let mut references = BTreeSet::new();
        for file in files {
            if !matches!(file.extension().as_deref(), Some("html" | "htm")) {
                continue;
            }
            match staged.read(&file.path).await {
                Ok(bytes) => references.extend(page_references(&String::from_utf8_lossy(&bytes))),
                Err(e) => tracing::warn!(path = %file.path.display(), error = %e.deref(), "Skipping unreadable page"),
            }
        }
        Ok(references)
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        self.site.exists(path).await.or_raise(|| ErrorKind::Storage(to_slash(path)))
    }

    /// Plan a single file under the same relative path, if it exists and the
    /// policy allows it.
    async fn file(&self, group: Group, path: &str, plan: &mut CopyPlan) -> Result<bool> {
        let Ok(path) = validate_path(path) else {
            tracing::debug!(path, "Ignoring reference outside the site tree");
            return Ok(false);
        };
        if !self.policy.allows(&path) || !self.exists(&path).await? {
            return Ok(false);
        }
        Ok(plan.add(group, path.clone(), path))
    }

    /// Plan every allowed file beneath `dir`.
    async fn tree(&self, group: Group, dir: &Path, plan: &mut CopyPlan) -> Result<usize> {
        let files = self.site.list(Some(dir)).await.or_raise(|| ErrorKind::Storage(to_slash(dir)))?;
        let mut added = 0;
        for file in files {
            if self.policy.allows(&file.path) && plan.add(group, file.path.clone(), file.path) {
                added += 1;
            }
        }
        Ok(added)
    }

    /// The active theme and, for a child theme, its parent, in full.
    async fn themes(&self, theme: &Theme, plan: &mut CopyPlan) -> Result<()> {
        let themes = self.layout.themes();
        for slug in std::iter::once(theme.stylesheet.as_str()).chain(theme.parent()) {
            let Some(dir) = child_dir(&themes, slug) else {
                tracing::warn!(slug, "Ignoring theme with an unsafe name");
                continue;
            };
            let added = self.tree(Group::Themes, &dir, plan).await?;
            tracing::debug!(slug, files = added, "Planned theme");
        }
        Ok(())
    }

    /// Referenced attachments, with every generated size.
    async fn media(&self, source: &dyn ContentSource, site: &SiteInfo, plan: &mut CopyPlan) -> Result<()> {
        let mut entities = Vec::new();
        let types = source.content_types().await.or_raise(|| ErrorKind::Source("content types"))?;
        for content_type in types.iter().filter(|t| t.public) {
            let published =
                source.published(&content_type.name).await.or_raise(|| ErrorKind::Source("published entities"))?;
            entities.extend(published);
        }
        let ids: Vec<u64> = attachment_ids(site, &entities).into_iter().collect();
        if ids.is_empty() {
            return Ok(());
        }
        let attachments = source.attachments(&ids).await.or_raise(|| ErrorKind::Source("attachments"))?;
        let uploads = self.layout.uploads();
        let mut added = 0;
        for attachment in &attachments {
            for file in attachment.files() {
                if self.file(Group::Uploads, &format!("{uploads}/{file}"), plan).await? {
                    added += 1;
                }
            }
        }
        tracing::debug!(attachments = attachments.len(), files = added, "Planned media");
        Ok(())
    }

    /// Files under uploads that pages reference outside the media library
    /// layout, typically plugin-generated stylesheets.
    async fn generated_uploads(&self, references: &BTreeSet<String>, plan: &mut CopyPlan) -> Result<()> {
        let uploads = self.layout.uploads();
        let paths: BTreeSet<String> = references.iter().filter_map(|r| generated_upload(r, &uploads)).collect();
        for path in paths {
            self.file(Group::Uploads, &path, plan).await?;
        }
        Ok(())
    }

    /// Files under `area` referenced by pages, plus whatever the referenced
    /// stylesheets pull in through `@import` and `url()`, followed
    /// transitively.
    async fn referenced(
        &self,
        references: &BTreeSet<String>,
        area: &str,
        group: Group,
        plan: &mut CopyPlan,
    ) -> Result<()> {
        let mut found: BTreeSet<String> = references.iter().filter_map(|r| locate(r, area)).collect();
        let mut queue: Vec<String> = found.iter().filter(|p| is_stylesheet(p)).cloned().collect();
        let mut processed = BTreeSet::new();
        while let Some(css) = queue.pop() {
            if !processed.insert(css.clone()) {
                continue;
            }
            let Ok(path) = validate_path(&css) else {
                continue;
            };
            let bytes = match self.site.read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::debug!(path = %css, error = %e.deref(), "Referenced stylesheet not readable");
                    continue;
                },
            };
            let base_dir = css.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
            for dependency in stylesheet_references(&String::from_utf8_lossy(&bytes)) {
                let Some(dependency) = resolve(&dependency, base_dir, area) else {
                    continue;
                };
                if is_stylesheet(&dependency) && !processed.contains(&dependency) {
                    queue.push(dependency.clone());
                }
                found.insert(dependency);
            }
        }
        let mut added = 0;
        for path in &found {
            if self.file(group, path, plan).await? {
                added += 1;
            }
        }
        tracing::debug!(area, referenced = found.len(), files = added, "Planned referenced assets");
        Ok(())
    }

    /// Directories copied whole when present: the configured extra content
    /// dirs, a root `type/` dir and root dirs named after public custom
    /// content types.
    async fn extras(&self, source: &dyn ContentSource, plan: &mut CopyPlan) -> Result<()> {
        for name in &self.extra_dirs {
            if let Some(dir) = child_dir(&self.layout.content_dir, name) {
                self.tree(Group::Extra, &dir, plan).await?;
            }
        }
        let types = source.content_types().await.or_raise(|| ErrorKind::Source("content types"))?;
        let custom = types.iter().filter(|t| t.public && !t.builtin).map(|t| t.name.as_str());
        for name in std::iter::once("type").chain(custom) {
            if let Some(dir) = child_dir("", name) {
                self.tree(Group::Extra, &dir, plan).await?;
            }
        }
        Ok(())
    }

    /// The site icon as `favicon.ico` (plus `favicon.<ext>` for other
    /// formats), else the root `favicon.ico`, then the well-known root files.
    async fn icons(&self, source: &dyn ContentSource, site: &SiteInfo, plan: &mut CopyPlan) -> Result<()> {
        if let Some(id) = site.site_icon {
            let icon = source.attachments(&[id]).await.or_raise(|| ErrorKind::Source("site icon"))?;
            let path = icon.first().and_then(|a| validate_path(format!("{}/{}", self.layout.uploads(), a.file)).ok());
            let found = match &path {
                Some(path) => self.exists(path).await?,
                None => false,
            };
            match path {
                Some(path) if found => {
                    plan.add(Group::Icons, path.clone(), PathBuf::from("favicon.ico"));
                    if let Some(ext) = icon.first().and_then(|a| a.extension())
                        && ext != "ico"
                    {
                        plan.add(Group::Icons, path, PathBuf::from(format!("favicon.{ext}")));
                    }
                },
                _ => tracing::warn!(attachment = id, "Site icon file not found"),
            }
        } else {
            self.file(Group::Icons, "favicon.ico", plan).await?;
        }
        for name in &self.root_icons {
            if child_dir("", name).is_some() {
                self.file(Group::Icons, name, plan).await?;
            }
        }
        Ok(())
    }
}

fn is_stylesheet(path: &str) -> bool {
    path.rsplit_once('.').is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("css"))
}

/// `parent/name` when `name` is a single plain path segment.
fn child_dir(parent: &str, name: &str) -> Option<PathBuf> {
    let plain = !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0']);
    plain.then(|| Path::new(parent).join(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stillpress_source::models::{Attachment, ContentType, Entity, Status};
    use stillpress_source::{Snapshot, SnapshotSource};
    use stillpress_storage::backend::MockBackend;
    use time::macros::datetime;

    fn site_info(site_icon: Option<u64>) -> SiteInfo {
        SiteInfo {
            home_url: "https://example.com".to_string(),
            site_url: None,
            posts_per_page: 10,
            published_posts: 1,
            theme: Theme { stylesheet: "child".to_string(), template: Some("parent".to_string()) },
            site_icon,
            custom_logo: None,
            header_image: None,
            background_image: None,
        }
    }

    fn source(site_icon: Option<u64>) -> SnapshotSource {
        SnapshotSource::new(Snapshot {
            site: Some(site_info(site_icon)),
            content_types: vec![
                ContentType { name: "post".to_string(), public: true, builtin: true, archive_url: None },
                ContentType { name: "news".to_string(), public: true, builtin: false, archive_url: None },
            ],
            entities: vec![Entity {
                id: 1,
                content_type: "post".to_string(),
                url: "https://example.com/hello/".to_string(),
                status: Status::Publish,
                published: datetime!(2024-01-01 0:00 UTC),
                modified: datetime!(2024-01-01 0:00 UTC),
                featured_media: Some(10),
                content: r#"<img class="wp-image-11">"#.to_string(),
            }],
            attachments: vec![
                Attachment { id: 10, file: "2024/01/hero.jpg".to_string(), sizes: vec!["hero-150x150.jpg".to_string()] },
                Attachment { id: 11, file: "2024/01/inline.png".to_string(), sizes: vec![] },
                Attachment { id: 12, file: "2024/01/unused.png".to_string(), sizes: vec![] },
                Attachment { id: 30, file: "2023/05/icon.png".to_string(), sizes: vec![] },
            ],
            ..Default::default()
        })
        .unwrap()
    }

    fn site_tree() -> BackendHandle {
        Arc::new(MockBackend::with_files([
            ("wp-content/themes/child/style.css", "body{}"),
            ("wp-content/themes/child/functions.php", "<?php"),
            ("wp-content/themes/child/.git/HEAD", "ref"),
            ("wp-content/themes/parent/style.css", "body{}"),
            ("wp-content/themes/other/style.css", "body{}"),
            ("wp-content/uploads/2024/01/hero.jpg", "jpg"),
            ("wp-content/uploads/2024/01/hero-150x150.jpg", "jpg"),
            ("wp-content/uploads/2024/01/inline.png", "png"),
            ("wp-content/uploads/2024/01/unused.png", "png"),
            ("wp-content/uploads/2023/05/icon.png", "png"),
            ("wp-content/uploads/elementor/css/post-1.css", ".a{}"),
            ("wp-content/plugins/forms/css/forms.css", r#"@import "parts/base.css"; .a{background:url(../img/bg.png)}"#),
            ("wp-content/plugins/forms/css/parts/base.css", r#"@import "../forms.css"; .b{background:url('../../img/dot.svg?v=1')}"#),
            ("wp-content/plugins/forms/img/bg.png", "png"),
            ("wp-content/plugins/forms/img/dot.svg", "svg"),
            ("wp-content/plugins/forms/img/unused.png", "png"),
            ("wp-content/plugins/forms/forms.php", "<?php"),
            ("wp-content/plugins/unused/a.js", "js"),
            ("wp-content/fonts/a.woff2", "font"),
            ("wp-includes/js/jquery/jquery.min.js", "js"),
            ("wp-includes/css/dashicons.css", r#".d{background:url("../fonts/dashicons.woff")}"#),
            ("wp-includes/fonts/dashicons.woff", "font"),
            ("wp-includes/js/unused.js", "js"),
            ("news/banner.png", "png"),
            ("favicon.ico", "ico"),
            ("apple-touch-icon.png", "png"),
        ]))
    }

    fn staged() -> MockBackend {
        MockBackend::with_files([
            (
                "index.html",
                concat!(
                    r#"<link rel="stylesheet" href="/wp-content/plugins/forms/css/forms.css?ver=2">"#,
                    r#"<link rel="stylesheet" href="/wp-content/uploads/elementor/css/post-1.css">"#,
                    r#"<link rel="stylesheet" href="/wp-includes/css/dashicons.css">"#,
                    r#"<script src="/wp-includes/js/jquery/jquery.min.js"></script>"#,
                    r#"<script src="/wp-includes/../wp-config.php"></script>"#,
                ),
            ),
            ("feed/index.xml", r#"<link href="/wp-content/plugins/unused/a.js"/>"#),
        ])
    }

    fn collector() -> Collector {
        Collector::new(site_tree(), Layout::default(), CopyPolicy::new(["php", "sql"]))
            .with_extra_dirs(["cache".to_string(), "fonts".to_string()])
            .with_root_icons(["apple-touch-icon.png".to_string(), "manifest.json".to_string()])
    }

    fn dests(plan: &CopyPlan) -> Vec<String> {
        plan.entries().map(|e| to_slash(&e.dest)).collect()
    }

    #[rstest::rstest]
    #[case("wp-content/themes/a/style.css", true)]
    #[case("wp-content/themes/a/functions.PHP", false)]
    #[case("wp-content/.htaccess", true)]
    #[case("wp-content/.env", false)]
    #[case("wp-content/themes/a/.git/config", false)]
    #[case("LICENSE", true)]
    fn test_policy(#[case] path: &str, #[case] allowed: bool) {
        assert_eq!(CopyPolicy::new(["php"]).allows(Path::new(path)), allowed);
    }

    #[tokio::test]
    async fn test_collect_is_reference_driven() {
        let plan = collector().collect(&source(None), &staged()).await.unwrap();
        assert_eq!(
            dests(&plan),
            vec![
                "apple-touch-icon.png",
                "favicon.ico",
                "news/banner.png",
                "wp-content/fonts/a.woff2",
                "wp-content/plugins/forms/css/forms.css",
                "wp-content/plugins/forms/css/parts/base.css",
                "wp-content/plugins/forms/img/bg.png",
                "wp-content/plugins/forms/img/dot.svg",
                "wp-content/themes/child/style.css",
                "wp-content/themes/parent/style.css",
                "wp-content/uploads/2024/01/hero-150x150.jpg",
                "wp-content/uploads/2024/01/hero.jpg",
                "wp-content/uploads/2024/01/inline.png",
                "wp-content/uploads/elementor/css/post-1.css",
                "wp-includes/css/dashicons.css",
                "wp-includes/fonts/dashicons.woff",
                "wp-includes/js/jquery/jquery.min.js",
            ]
        );
        let summary = plan.summary();
        assert_eq!(summary[&Group::Themes], 2);
        assert_eq!(summary[&Group::Plugins], 4);
        assert_eq!(summary[&Group::Runtime], 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_plugin_outside_the_site_is_not_planned() {
        use stillpress_storage::backend::LocalBackend;

        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "DB_PASSWORD=hunter2").unwrap();
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("wp-content/plugins/forms")).unwrap();
        std::fs::write(root.path().join("wp-content/plugins/forms/forms.js"), "js").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("wp-content/plugins/evil")).unwrap();

        let site: BackendHandle = Arc::new(LocalBackend::open("site", root.path()).unwrap());
        let staged = MockBackend::with_files([(
            "index.html",
            concat!(
                r#"<script src="/wp-content/plugins/evil/secret"></script>"#,
                r#"<script src="/wp-content/plugins/forms/forms.js"></script>"#,
            ),
        )]);
        let collector = Collector::new(site, Layout::default(), CopyPolicy::default());
        let plan = collector.collect(&source(None), &staged).await.unwrap();
        assert!(plan.contains("wp-content/plugins/forms/forms.js"));
        assert!(!plan.contains("wp-content/plugins/evil/secret"));
    }

    #[tokio::test]
    async fn test_site_icon_becomes_favicon() {
        let plan = collector().collect(&source(Some(30)), &staged()).await.unwrap();
        let favicons: Vec<(String, String)> = plan
            .entries()
            .filter(|e| e.group == Group::Icons)
            .map(|e| (to_slash(&e.source), to_slash(&e.dest)))
            .collect();
        assert!(favicons.contains(&("wp-content/uploads/2023/05/icon.png".to_string(), "favicon.ico".to_string())));
        assert!(favicons.contains(&("wp-content/uploads/2023/05/icon.png".to_string(), "favicon.png".to_string())));
        // The site icon is also a referenced attachment.
        assert!(plan.contains("wp-content/uploads/2023/05/icon.png"));
    }

    #[tokio::test]
    async fn test_missing_directories_plan_nothing() {
        let collector = Collector::new(Arc::new(MockBackend::default()), Layout::default(), CopyPolicy::default())
            .with_extra_dirs(["cache".to_string()])
            .with_root_icons(["manifest.json".to_string()]);
        let plan = collector.collect(&source(None), &staged()).await.unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_child_dir() {
        assert_eq!(child_dir("wp-content/themes", "child"), Some(PathBuf::from("wp-content/themes/child")));
        assert_eq!(child_dir("", "type"), Some(PathBuf::from("type")));
        assert_eq!(child_dir("wp-content/themes", ".."), None);
        assert_eq!(child_dir("wp-content/themes", "a/b"), None);
        assert_eq!(child_dir("wp-content/themes", ""), None);
    }
}
