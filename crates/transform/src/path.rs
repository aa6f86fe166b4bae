//! URL to output path mapping.

use crate::consts::{FEED_PATH, FILE_EXTENSION};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use url::Url;

/// Derive the staged file path for a page URL.
///
/// - the root maps to `index.html`
/// - feed, rss and atom paths get `/index.xml`
/// - paths without a file extension get `/index.html`
/// - anything else keeps its name
///
/// Query strings and fragments never contribute. Percent-encoded segments
/// are decoded so that static hosts find the file under the name they
/// decode requests to; a segment that would decode into a separator or a NUL
/// byte keeps its encoded form.
///
/// ```
/// use stillpress_transform::url_to_path;
/// assert_eq!(url_to_path("https://example.com/").unwrap(), "index.html");
/// assert_eq!(url_to_path("https://example.com/about/").unwrap(), "about/index.html");
/// assert_eq!(url_to_path("https://example.com/feed/atom/").unwrap(), "feed/atom/index.xml");
/// assert_eq!(url_to_path("https://example.com/sitemap.xml").unwrap(), "sitemap.xml");
/// ```
pub fn url_to_path(url: &str) -> Result<String> {
    let parsed = Url::parse(url).or_raise(|| ErrorKind::InvalidUrl(url.to_string()))?;
    let decoded: Vec<String> = parsed.path().split('/').map(decode_segment).collect();
    let path = decoded.join("/");
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        return Ok("index.html".to_string());
    }
    let full = if FEED_PATH.is_match(path) {
        format!("{path}/index.xml")
    } else if !FILE_EXTENSION.is_match(path) {
        format!("{path}/index.html")
    } else {
        path.to_string()
    };
    Ok(full.trim_start_matches('/').to_string())
}

fn decode_segment(segment: &str) -> String {
    match urlencoding::decode(segment) {
        Ok(decoded) if !decoded.contains(['/', '\\', '\0']) => decoded.into_owned(),
        _ => segment.to_string(),
    }
}
