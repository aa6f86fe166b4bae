//! The URL enumerator.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use stillpress_cache::SourceRef;
use stillpress_source::ContentSource;
use stillpress_source::models::Entity;
use std::collections::{HashMap, HashSet};
use tracing::instrument;

const FEEDS: [&str; 5] = ["feed/", "feed/rss/", "feed/rss2/", "feed/atom/", "comments/feed/"];
const SITEMAPS: [&str; 5] = [
    "sitemap.xml",
    "wp-sitemap.xml",
    "wp-sitemap-posts-post-1.xml",
    "wp-sitemap-posts-page-1.xml",
    "wp-sitemap-taxonomies-category-1.xml",
];

/// Optional page families. Categories, entities and custom taxonomies are
/// always enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Coverage {
    pub tags: bool,
    pub dates: bool,
    pub authors: bool,
    pub post_formats: bool,
    pub sitemap: bool,
    pub rss: bool,
}
impl Default for Coverage {
    fn default() -> Self {
        Self { tags: false, dates: false, authors: false, post_formats: false, sitemap: true, rss: true }
    }
}

/// Which enumeration step produced a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Category {
    #[display("home")]
    Home,
    #[display("entity")]
    Entity,
    #[display("type archive")]
    TypeArchive,
    #[display("category")]
    Category,
    #[display("tag")]
    Tag,
    #[display("date")]
    Date,
    #[display("taxonomy")]
    Taxonomy,
    #[display("post format")]
    PostFormat,
    #[display("author")]
    Author,
    #[display("feed")]
    Feed,
    #[display("sitemap")]
    Sitemap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUnit {
    pub url: String,
    pub discovered_from: Category,
    pub content_id: Option<u64>,
}

/// The deduplicated page list for one run, plus the address to source
/// entity index the crawler validates cache entries against.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    units: Vec<PageUnit>,
    seen: HashSet<String>,
    index: HashMap<String, SourceRef>,
}
impl Enumeration {
    fn push(&mut self, url: String, discovered_from: Category) {
        if self.seen.insert(url.clone()) {
            self.units.push(PageUnit { url, discovered_from, content_id: None });
        }
    }

    fn push_entity(&mut self, url: String, entity: &Entity) {
        let source = SourceRef { id: entity.id, modified: entity.modified_utc() };
        self.index.insert(url.clone(), source);
        if self.seen.insert(url.clone()) {
            self.units.push(PageUnit { url, discovered_from: Category::Entity, content_id: Some(entity.id) });
        }
    }

    /// Push a listing and its pagination pages.
    fn push_paginated(&mut self, url: &str, items: u64, per_page: u32, discovered_from: Category) {
        let base = with_slash(url);
        self.push(base.clone(), discovered_from);
        for n in 2..=page_count(items, per_page) {
            self.push(format!("{base}page/{n}/"), discovered_from);
        }
    }

    pub fn units(&self) -> &[PageUnit] {
        &self.units
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.url.as_str())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// The source entity behind an address, if it is an entity's permalink.
    pub fn source_of(&self, url: &str) -> Option<&SourceRef> {
        self.index.get(url)
    }
}

fn with_slash(url: &str) -> String {
    format!("{}/", url.trim_end_matches('/'))
}

fn page_count(items: u64, per_page: u32) -> u64 {
    items.div_ceil(u64::from(per_page.max(1)))
}

/// Collect every publishable address of the site.
///
/// Listings are fetched in bulk per kind before iterating, so the number of
/// source queries depends on the number of content types and taxonomies,
/// never on the number of items.
#[instrument(skip(source))]
pub async fn enumerate(source: &dyn ContentSource, coverage: Coverage) -> Result<Enumeration> {
    let site = source.site().await.or_raise(|| ErrorKind::Source("site"))?;
    let per_page = site.posts_per_page;
    let home = with_slash(&site.home_url);
    let mut out = Enumeration::default();

    out.push_paginated(&home, site.published_posts, per_page, Category::Home);

    let content_types = source.content_types().await.or_raise(|| ErrorKind::Source("content types"))?;
    for content_type in content_types.iter().filter(|t| t.public) {
        let entities = source.published(&content_type.name).await.or_raise(|| ErrorKind::Source("entities"))?;
        for entity in &entities {
            out.push_entity(source.permalink(entity), entity);
        }
    }
    for content_type in content_types.iter().filter(|t| t.public && !t.builtin) {
        if let Some(archive) = &content_type.archive_url {
            out.push(archive.clone(), Category::TypeArchive);
        }
    }

    let mut paginated_terms = vec![("category", Category::Category)];
    if coverage.tags {
        paginated_terms.push(("post_tag", Category::Tag));
    }
    for (taxonomy, category) in paginated_terms {
        let terms = source.terms(taxonomy).await.or_raise(|| ErrorKind::Source("terms"))?;
        for term in terms.iter().filter(|t| t.count > 0) {
            out.push_paginated(&term.url, term.count, per_page, category);
        }
    }

    if coverage.dates {
        let days = source.date_buckets().await.or_raise(|| ErrorKind::Source("date buckets"))?;
        for day in days {
            let (year, month, date) = (day.year(), u8::from(day.month()), day.day());
            out.push(format!("{home}{year}/"), Category::Date);
            out.push(format!("{home}{year}/{month:02}/"), Category::Date);
            out.push(format!("{home}{year}/{month:02}/{date:02}/"), Category::Date);
        }
    }

    let taxonomies = source.taxonomies().await.or_raise(|| ErrorKind::Source("taxonomies"))?;
    for taxonomy in taxonomies.iter().filter(|t| t.public && !t.builtin) {
        let terms = source.terms(&taxonomy.name).await.or_raise(|| ErrorKind::Source("terms"))?;
        for term in terms.iter().filter(|t| t.count > 0) {
            out.push(term.url.clone(), Category::Taxonomy);
        }
    }

    if coverage.post_formats {
        let formats = source.terms("post_format").await.or_raise(|| ErrorKind::Source("terms"))?;
        for format in formats.iter().filter(|t| t.count > 0) {
            out.push_paginated(&format.url, format.count, per_page, Category::PostFormat);
        }
    }

    if coverage.authors {
        let authors = source.authors().await.or_raise(|| ErrorKind::Source("authors"))?;
        for author in authors {
            out.push_paginated(&author.url, author.post_count, per_page, Category::Author);
        }
    }

    if coverage.rss {
        for feed in FEEDS {
            out.push(format!("{home}{feed}"), Category::Feed);
        }
    }

    if coverage.sitemap {
        let conditional = [
            (coverage.tags, "wp-sitemap-taxonomies-post_tag-1.xml"),
            (coverage.post_formats, "wp-sitemap-taxonomies-post_format-1.xml"),
            (coverage.authors, "wp-sitemap-users-1.xml"),
        ];
        let enabled = conditional.iter().filter(|(on, _)| *on).map(|(_, name)| *name);
        for sitemap in SITEMAPS.into_iter().chain(enabled) {
            out.push(format!("{home}{sitemap}"), Category::Sitemap);
        }
    }

    tracing::debug!(pages = out.len(), entities = out.index.len(), "Enumerated site");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use stillpress_source::models::{Author, ContentType, SiteInfo, Status, Taxonomy, Term, Theme};
    use stillpress_source::{Snapshot, SnapshotSource};
    use time::macros::datetime;

    fn entity(id: u64, content_type: &str, slug: &str) -> Entity {
        Entity {
            id,
            content_type: content_type.to_string(),
            url: format!("https://example.com/{slug}/"),
            status: Status::Publish,
            published: datetime!(2024-03-01 10:00 UTC),
            modified: datetime!(2024-03-02 10:00 UTC),
            featured_media: None,
            content: String::new(),
        }
    }

    fn term(id: u64, taxonomy: &str, url: &str, count: u64) -> Term {
        Term { id, taxonomy: taxonomy.to_string(), url: format!("https://example.com/{url}/"), count }
    }

    fn content_type(name: &str, builtin: bool, archive_url: Option<&str>) -> ContentType {
        ContentType { name: name.to_string(), public: true, builtin, archive_url: archive_url.map(String::from) }
    }

    /// Three pages, two posts tagged `rust`, one custom type with an archive.
    fn source() -> SnapshotSource {
        let mut draft = entity(99, "post", "draft");
        draft.status = Status::Draft;
        SnapshotSource::new(Snapshot {
            site: Some(SiteInfo {
                home_url: "https://example.com".to_string(),
                site_url: None,
                posts_per_page: 1,
                published_posts: 2,
                theme: Theme { stylesheet: "t".to_string(), template: None },
                site_icon: None,
                custom_logo: None,
                header_image: None,
                background_image: None,
            }),
            content_types: vec![
                content_type("post", true, None),
                content_type("page", true, None),
                content_type("book", false, Some("https://example.com/books/")),
            ],
            entities: vec![
                entity(3, "page", "about"),
                entity(1, "post", "hello"),
                entity(2, "post", "second"),
                entity(4, "page", "contact"),
                entity(5, "page", "privacy"),
                entity(6, "book", "books/dune"),
                draft,
            ],
            taxonomies: vec![
                Taxonomy { name: "category".to_string(), public: true, builtin: true },
                Taxonomy { name: "post_tag".to_string(), public: true, builtin: true },
                Taxonomy { name: "genre".to_string(), public: true, builtin: false },
            ],
            terms: vec![
                term(10, "category", "category/news", 2),
                term(11, "category", "category/empty", 0),
                term(12, "post_tag", "tag/rust", 2),
                term(13, "genre", "genre/scifi", 1),
                term(14, "post_format", "type/image", 1),
            ],
            authors: vec![Author { id: 1, url: "https://example.com/author/alice/".to_string(), post_count: 2 }],
            attachments: vec![],
        })
        .unwrap()
    }

    fn urls(enumeration: &Enumeration) -> HashSet<String> {
        enumeration.urls().map(String::from).collect()
    }

    #[tokio::test]
    async fn test_default_coverage() {
        let out = enumerate(&source(), Coverage::default()).await.unwrap();
        let urls = urls(&out);
        for expected in [
            "https://example.com/",
            "https://example.com/page/2/",
            "https://example.com/hello/",
            "https://example.com/about/",
            "https://example.com/books/dune/",
            "https://example.com/books/",
            "https://example.com/category/news/",
            "https://example.com/category/news/page/2/",
            "https://example.com/genre/scifi/",
            "https://example.com/feed/atom/",
            "https://example.com/wp-sitemap-taxonomies-category-1.xml",
        ] {
            assert!(urls.contains(expected), "missing {expected}");
        }
        assert!(!urls.contains("https://example.com/draft/"));
        assert!(!urls.contains("https://example.com/category/empty/"));
        assert!(!urls.iter().any(|u| u.contains("/tag/") || u.contains("post_tag") || u.contains("/author/")));
        assert_eq!(out.len(), urls.len());
    }

    #[tokio::test]
    async fn test_entity_index() {
        let out = enumerate(&source(), Coverage::default()).await.unwrap();
        let source_ref = out.source_of("https://example.com/hello/").unwrap();
        assert_eq!(source_ref.id, 1);
        assert_eq!(source_ref.modified, datetime!(2024-03-02 10:00 UTC).to_utc());
        assert!(out.source_of("https://example.com/").is_none());
        let unit = out.units().iter().find(|u| u.url == "https://example.com/about/").unwrap();
        assert_eq!((unit.discovered_from, unit.content_id), (Category::Entity, Some(3)));
    }

    #[tokio::test]
    async fn test_entities_are_ascending_within_type() {
        let out = enumerate(&source(), Coverage::default()).await.unwrap();
        let pages: Vec<u64> = out
            .units()
            .iter()
            .filter_map(|u| u.content_id)
            .filter(|id| [3, 4, 5].contains(id))
            .collect();
        assert_eq!(pages, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_enumeration_is_deterministic() {
        let coverage = Coverage { tags: true, dates: true, authors: true, post_formats: true, ..Default::default() };
        let first = enumerate(&source(), coverage).await.unwrap();
        let second = enumerate(&source(), coverage).await.unwrap();
        assert_eq!(first.units(), second.units());
    }

    #[rstest]
    #[case::tags(Coverage { tags: true, ..Default::default() }, Category::Tag, 2)]
    #[case::dates(Coverage { dates: true, ..Default::default() }, Category::Date, 3)]
    #[case::authors(Coverage { authors: true, ..Default::default() }, Category::Author, 2)]
    #[case::post_formats(Coverage { post_formats: true, ..Default::default() }, Category::PostFormat, 1)]
    #[tokio::test]
    async fn test_toggle_only_adds_its_own_family(
        #[case] coverage: Coverage,
        #[case] family: Category,
        #[case] family_pages: usize,
    ) {
        let base = urls(&enumerate(&source(), Coverage::default()).await.unwrap());
        let toggled = enumerate(&source(), coverage).await.unwrap();
        let added: Vec<&PageUnit> = toggled.units().iter().filter(|u| !base.contains(&u.url)).collect();
        let (family_units, sitemaps): (Vec<&PageUnit>, Vec<&PageUnit>) =
            added.into_iter().partition(|u| u.discovered_from == family);
        assert_eq!(family_units.len(), family_pages);
        // Dates have no sitemap of their own; the others add exactly one.
        let expected_sitemaps = usize::from(family != Category::Date);
        assert_eq!(sitemaps.len(), expected_sitemaps);
        assert!(sitemaps.iter().all(|u| u.discovered_from == Category::Sitemap));
        assert!(base.iter().all(|u| urls(&toggled).contains(u)));
    }

    #[tokio::test]
    async fn test_tag_archives_come_and_go_without_touching_pages() {
        let without = enumerate(&source(), Coverage::default()).await.unwrap();
        let with = enumerate(&source(), Coverage { tags: true, ..Default::default() }).await.unwrap();
        let added: HashSet<String> = urls(&with).difference(&urls(&without)).cloned().collect();
        assert_eq!(
            added,
            HashSet::from([
                "https://example.com/tag/rust/".to_string(),
                "https://example.com/tag/rust/page/2/".to_string(),
                "https://example.com/wp-sitemap-taxonomies-post_tag-1.xml".to_string(),
            ])
        );
        for page in ["about", "contact", "privacy"] {
            assert!(urls(&without).contains(&format!("https://example.com/{page}/")));
        }
    }

    #[tokio::test]
    async fn test_feeds_and_sitemaps_can_be_disabled() {
        let coverage = Coverage { rss: false, sitemap: false, ..Default::default() };
        let out = enumerate(&source(), coverage).await.unwrap();
        assert!(!out.units().iter().any(|u| matches!(u.discovered_from, Category::Feed | Category::Sitemap)));
    }

    #[rstest]
    #[case(0, 10, 0)]
    #[case(10, 10, 1)]
    #[case(11, 10, 2)]
    #[case(5, 0, 5)]
    fn test_page_count(#[case] items: u64, #[case] per_page: u32, #[case] expected: u64) {
        assert_eq!(page_count(items, per_page), expected);
    }
}
