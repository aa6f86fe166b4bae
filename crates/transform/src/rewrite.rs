//! Absolute-to-relative URL rewriting.
//!
//! Every rule here is a pure function over text. Running [`relative`] on its
//! own output changes nothing.

use crate::consts::{STYLE_BLOCK, STYLE_URL};
use regex::Captures;

/// The spellings of the site's base addresses that get rewritten.
///
/// Built from both the home URL and the CMS URL (they differ for a site
/// installed in a subdirectory), each in `http` and `https` form. Longer
/// bases are tried first so that `https://example.com/wp/` is not half
/// rewritten by `https://example.com/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUrls {
    /// `scheme://host/path/` forms.
    with_slash: Vec<String>,
    /// `scheme://host/path` forms.
    without_slash: Vec<String>,
}
impl BaseUrls {
    pub fn new<'a>(bases: impl IntoIterator<Item = &'a str>) -> Self {
        let mut without_slash: Vec<String> = Vec::new();
        for base in bases {
            let trimmed = base.trim().trim_end_matches('/');
            let Some((_, rest)) = trimmed.split_once("://") else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            for scheme in ["https", "http"] {
                let variant = format!("{scheme}://{rest}");
                if !without_slash.contains(&variant) {
                    without_slash.push(variant);
                }
            }
        }
        without_slash.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let with_slash = without_slash.iter().map(|b| format!("{b}/")).collect();
        Self { with_slash, without_slash }
    }

    pub fn with_slash(&self) -> &[String] {
        &self.with_slash
    }

    pub fn without_slash(&self) -> &[String] {
        &self.without_slash
    }

    /// True if `text` still mentions any base address.
    pub fn occurs_in(&self, text: &str) -> bool {
        self.without_slash.iter().any(|b| text.contains(b.as_str()))
    }
}

/// Replace every `scheme://host/` spelling with `/`. Extra slashes right
/// after the base are swallowed too, so `https://example.com//a` does not
/// turn into the protocol-relative `//a`.
pub fn strip_bases(text: &str, bases: &BaseUrls) -> String {
    let mut out = text.to_string();
    for base in bases.with_slash() {
        out = replace_base(&out, base);
    }
    out
}

fn replace_base(text: &str, base: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find(base) {
        out.push_str(&rest[..i]);
        out.push('/');
        rest = rest[i + base.len()..].trim_start_matches('/');
    }
    out.push_str(rest);
    out
}

/// Full HTML rewrite: JSON-escaped forms, inline style `url()` values, plain
/// occurrences, then doubled-slash cleanup.
pub fn relative(html: &str, bases: &BaseUrls) -> String {
    let mut out = html.to_string();
    // JSON-escaped forms first, otherwise the plain pass would leave a
    // dangling `\/` behind.
    for base in bases.with_slash() {
        out = out.replace(&escape_slashes(base), "\\/");
    }
    for base in bases.without_slash() {
        out = out.replace(&escape_slashes(base), "");
    }
    out = style_blocks(&out, bases);
    out = strip_bases(&out, bases);
    collapse_slashes(&out)
}

/// XML documents (feeds, sitemaps) only get the plain base replacement.
pub fn relative_xml(xml: &str, bases: &BaseUrls) -> String {
    strip_bases(xml, bases)
}

fn escape_slashes(s: &str) -> String {
    s.replace('/', "\\/")
}

fn style_blocks(html: &str, bases: &BaseUrls) -> String {
    STYLE_BLOCK
        .replace_all(html, |caps: &Captures| {
            let css = STYLE_URL.replace_all(&caps[2], |u: &Captures| style_url(u, bases));
            format!("<style{}>{}</style>", &caps[1], css)
        })
        .into_owned()
}

fn style_url(caps: &Captures, bases: &BaseUrls) -> String {
    let (open, value, close) = (&caps[1], &caps[2], &caps[3]);
    if open != close || value.starts_with("data:") || value.starts_with('#') {
        return caps[0].to_string();
    }
    let mut rewritten = strip_bases(value, bases);
    for base in bases.without_slash() {
        rewritten = rewritten.replace(base.as_str(), "");
    }
    if rewritten == value {
        return caps[0].to_string();
    }
    if !rewritten.starts_with('/') && !rewritten.starts_with("http") {
        rewritten.insert(0, '/');
    }
    format!("url({open}{rewritten}{close})")
}

/// Collapse runs of two or more slashes into one.
///
/// A run is left alone when it is followed by `/`, `#` or whitespace (comment
/// markers and the like). When it directly follows `:` or a quote (a scheme
/// separator or a protocol-relative URL), the first slash stays and the rest
/// of the run collapses behind it, so `https:///x` becomes `https://x`.
pub fn collapse_slashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    let mut prev: Option<char> = None;
    while let Some((start, c)) = chars.next() {
        if c != '/' {
            out.push(c);
            prev = Some(c);
            continue;
        }
        let mut end = start + 1;
        while let Some(&(i, '/')) = chars.peek() {
            end = i + 1;
            chars.next();
        }
        let run = end - start;
        let next = text[end..].chars().next();
        let guarded_next = matches!(next, Some(n) if n == '#' || n.is_whitespace());
        let guarded_prev = matches!(prev, Some(':' | '"' | '\''));
        if run < 2 || guarded_next {
            out.push_str(&text[start..end]);
        } else if guarded_prev {
            out.push_str("//");
        } else {
            out.push('/');
        }
        prev = Some('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn bases() -> BaseUrls {
        BaseUrls::new(["https://example.com"])
    }

    #[test]
    fn test_variants() {
        let bases = BaseUrls::new(["https://example.com/", "http://example.com/wp"]);
        assert_eq!(
            bases.without_slash(),
            ["https://example.com/wp", "http://example.com/wp", "https://example.com", "http://example.com"]
        );
        assert_eq!(bases.with_slash()[0], "https://example.com/wp/");
    }

    #[rstest]
    #[case(r#"<a href="https://example.com/about/">"#, r#"<a href="/about/">"#)]
    #[case(r#"<a href="http://example.com/about/">"#, r#"<a href="/about/">"#)]
    #[case(r#"<img src="https://example.com//wp-content/a.png">"#, r#"<img src="/wp-content/a.png">"#)]
    #[case(r#"<img src="https://example.com/a//b.png">"#, r#"<img src="/a/b.png">"#)]
    #[case(r#"<a href="https://other.org/x">"#, r#"<a href="https://other.org/x">"#)]
    #[case(r#"{"url":"https:\/\/example.com\/feed\/"}"#, r#"{"url":"\/feed\/"}"#)]
    #[case(r#"{"root":"https:\/\/example.com"}"#, r#"{"root":""}"#)]
    #[case(r#"<script src="//cdn.example.org/x.js"></script>"#, r#"<script src="//cdn.example.org/x.js"></script>"#)]
    fn test_relative(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(relative(input, &bases()), expected);
    }

    #[rstest]
    #[case(r#"<style>.a{background:url('https://example.com/img/a.png')}</style>"#, r#"<style>.a{background:url('/img/a.png')}</style>"#)]
    #[case(r#"<style>.a{background:url(https://example.com)}</style>"#, r#"<style>.a{background:url(/)}</style>"#)]
    #[case(r#"<style>.a{background:url(data:image/png;base64,AAA)}</style>"#, r#"<style>.a{background:url(data:image/png;base64,AAA)}</style>"#)]
    #[case(r#"<style>.a{background:url(img/a.png)}</style>"#, r#"<style>.a{background:url(img/a.png)}</style>"#)]
    #[case(r#"<style media="all">.a{b:url("https://example.com/b.png")}</style>"#, r#"<style media="all">.a{b:url("/b.png")}</style>"#)]
    fn test_style_blocks(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(relative(input, &bases()), expected);
    }

    #[rstest]
    #[case("a//b", "a/b")]
    #[case("a///b", "a/b")]
    #[case("https://x", "https://x")]
    #[case("https:///x", "https://x")]
    #[case(r#"src="//cdn/x""#, r#"src="//cdn/x""#)]
    #[case(r#"src='///cdn/x'"#, r#"src='//cdn/x'"#)]
    #[case("x = 1; // comment", "x = 1; // comment")]
    #[case("<a href=\"#\">//#anchor", "<a href=\"#\">//#anchor")]
    #[case("trailing//", "trailing/")]
    #[case("/", "/")]
    #[case("é//ü", "é/ü")]
    fn test_collapse_slashes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(collapse_slashes(input), expected);
    }

    #[test]
    fn test_relative_is_idempotent() {
        let html = concat!(
            r#"<html><head><style>body{background:url("https://example.com/bg.png")}</style>"#,
            r#"<script>var x = {"ajax":"https:\/\/example.com\/wp-admin\/admin-ajax.php"}; // note</script></head>"#,
            r#"<body><a href="https://example.com/">Home</a><a href="http://example.com//about//">About</a>"#,
            r#"<a href="https://elsewhere.org///x">Out</a></body></html>"#,
        );
        let once = relative(html, &bases());
        let twice = relative(&once, &bases());
        assert_eq!(once, twice);
        assert!(!bases().occurs_in(&once));
        assert!(!once.contains("org///"));
    }

    #[test]
    fn test_strip_bases_swallows_extra_slashes() {
        assert_eq!(strip_bases("https://example.com///x https://example.com/", &bases()), "/x /");
    }

    #[test]
    fn test_relative_xml_only_touches_bases() {
        let xml = "<?xml version=\"1.0\"?><loc>https://example.com/a//b/</loc>";
        assert_eq!(relative_xml(xml, &bases()), "<?xml version=\"1.0\"?><loc>/a//b/</loc>");
    }
}
