//! Page-level transform: picks the rule set for a fetched body and runs it.

use crate::archive::{ArchiveToggles, neutralize};
use crate::consts::FEED_PATH;
use crate::rewrite::{BaseUrls, relative, relative_xml};
use crate::sanitize::strip_dynamic;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Whether site addresses are rewritten to root-relative form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlMode {
    #[default]
    Relative,
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Html,
    Xml,
}

/// Non-fatal findings about a transformed page.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Warning {
    #[display("content shrank from {before} to {after} bytes during transform")]
    Shrunk { before: usize, after: usize },
    #[display("missing `<body` or `</html>`")]
    MissingStructure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub body: String,
    pub kind: PageKind,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone)]
pub struct Transformer {
    bases: BaseUrls,
    url_mode: UrlMode,
    archives: ArchiveToggles,
}
impl Transformer {
    pub fn new(bases: BaseUrls, url_mode: UrlMode, archives: ArchiveToggles) -> Self {
        Self { bases, url_mode, archives }
    }

    pub fn bases(&self) -> &BaseUrls {
        &self.bases
    }

    #[instrument(level = "debug", skip(self, body), fields(bytes = body.len()))]
    pub fn transform(&self, url: &str, body: &str) -> Transformed {
        let kind = detect_kind(url, body);
        let rewrite = self.url_mode == UrlMode::Relative;
        let out = match kind {
            PageKind::Xml if rewrite => relative_xml(body, &self.bases),
            PageKind::Xml => body.to_string(),
            PageKind::Html => {
                let rewritten = match rewrite {
                    true => relative(body, &self.bases),
                    false => body.to_string(),
                };
                neutralize(&strip_dynamic(&rewritten), self.archives)
            },
        };

        let mut warnings = Vec::new();
        if !body.is_empty() && out.len() * 10 < body.len() {
            warnings.push(Warning::Shrunk { before: body.len(), after: out.len() });
        }
        if kind == PageKind::Html {
            let lower = out.to_ascii_lowercase();
            if !lower.contains("<body") || !lower.contains("</html>") {
                warnings.push(Warning::MissingStructure);
            }
        }
        Transformed { body: out, kind, warnings }
    }
}

/// Feeds by whole path segment, sitemaps by extension, anything else by an
/// XML declaration.
fn detect_kind(url: &str, body: &str) -> PageKind {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let xml_url = FEED_PATH.is_match(path) || path.ends_with(".xml");
    if xml_url || body.trim_start().starts_with("<?xml") { PageKind::Xml } else { PageKind::Html }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn transformer(url_mode: UrlMode, archives: ArchiveToggles) -> Transformer {
        Transformer::new(BaseUrls::new(["https://example.com"]), url_mode, archives)
    }

    const PAGE: &str = concat!(
        r#"<html><head><link rel="https://api.w.org/" href="https://example.com/wp-json/"></head>"#,
        r#"<body><a href="https://example.com/about/">About</a>"#,
        r#"<a href="https://example.com/tag/rust/" rel="tag">Rust</a>"#,
        r#"<form><input type="hidden" name="_wpnonce" value="f00"></form></body></html>"#,
    );

    #[rstest]
    #[case("https://example.com/feed/", "<rss/>", PageKind::Xml)]
    #[case("https://example.com/wp-sitemap.xml", "<urlset/>", PageKind::Xml)]
    #[case("https://example.com/comments/feed/atom/", "", PageKind::Xml)]
    #[case("https://example.com/page/", "  <?xml version=\"1.0\"?><x/>", PageKind::Xml)]
    #[case("https://example.com/about/", "<html></html>", PageKind::Html)]
    #[case("https://example.com/feedback/", "<html></html>", PageKind::Html)]
    #[case("https://example.com/atomic-design/", "<html></html>", PageKind::Html)]
    #[case("https://example.com/blog/rss", "<rss/>", PageKind::Xml)]
    #[case("https://example.com/sitemap.xml?page=2", "<urlset/>", PageKind::Xml)]
    fn test_detect_kind(#[case] url: &str, #[case] body: &str, #[case] expected: PageKind) {
        assert_eq!(detect_kind(url, body), expected);
    }

    #[test]
    fn test_html_pipeline_order() {
        let out = transformer(UrlMode::Relative, ArchiveToggles::default()).transform("https://example.com/", PAGE);
        assert_eq!(out.kind, PageKind::Html);
        assert_eq!(
            out.body,
            concat!(
                "<html><head></head>",
                r#"<body><a href="/about/">About</a><span>Rust</span>"#,
                "<form></form></body></html>",
            )
        );
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_absolute_mode_keeps_addresses() {
        let archives = ArchiveToggles { tags: true, dates: true, authors: true };
        let out = transformer(UrlMode::Absolute, archives).transform("https://example.com/", PAGE);
        assert!(out.body.contains(r#"href="https://example.com/about/""#));
        assert!(out.body.contains(r#"rel="tag">Rust</a>"#));
        assert!(!out.body.contains("_wpnonce"));
    }

    #[test]
    fn test_xml_only_rewrites_bases() {
        let feed = r#"<?xml version="1.0"?><rss><link>https://example.com/a/</link><a href="/tag/x/" rel="tag">x</a></rss>"#;
        let out = transformer(UrlMode::Relative, ArchiveToggles::default()).transform("https://example.com/feed/", feed);
        assert_eq!(out.kind, PageKind::Xml);
        assert_eq!(out.body, r#"<?xml version="1.0"?><rss><link>/a/</link><a href="/tag/x/" rel="tag">x</a></rss>"#);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_missing_structure_warns() {
        let out = transformer(UrlMode::Relative, ArchiveToggles::default())
            .transform("https://example.com/x/", "<div>fragment</div>");
        assert_eq!(out.warnings, vec![Warning::MissingStructure]);
    }

    #[test]
    fn test_collapse_below_a_tenth_warns() {
        let nonce = r#"<input type="hidden" name="_wpnonce" value="0">"#.repeat(50);
        let body = format!("<html><body>{nonce}</body></html>");
        let out = transformer(UrlMode::Relative, ArchiveToggles::default()).transform("https://example.com/x/", &body);
        assert_eq!(out.body, "<html><body></body></html>");
        assert!(matches!(out.warnings[..], [Warning::Shrunk { after: 26, .. }]));
    }
}
