use regex::Regex;
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

// Inline <style> blocks and the url() references inside them. The regex crate
// has no backreferences, so matching quotes are checked by the caller.
regex!(STYLE_BLOCK, r#"(?is)<style([^>]*)>(.*?)</style>"#);
regex!(STYLE_URL, r#"url\s*\(\s*(['"]?)([^'")]+)(['"]?)\s*\)"#);

// Dynamic markers: nonces, referer fields and machine discovery links.
regex!(NONCE_INPUT, r#"(?i)<input[^>]*name=['"]_wpnonce['"][^>]*>"#);
regex!(REFERER_INPUT, r#"(?i)<input[^>]*name=['"]_wp_http_referer['"][^>]*>"#);
regex!(API_LINK, r#"(?i)<link[^>]*rel=['"]https://api\.w\.org/?['"][^>]*>"#);
regex!(OEMBED_JSON_LINK, r#"(?i)<link[^>]*type=['"]application/json\+oembed['"][^>]*>"#);
regex!(OEMBED_XML_LINK, r#"(?i)<link[^>]*type=['"]text/xml\+oembed['"][^>]*>"#);

// Archive anchors. Capture groups: everything before the target attribute,
// the target, everything after, and the link text.
regex!(TAG_REL_ANCHOR, r#"(?is)<a\s+([^>]*?)rel=['"]tag['"]([^>]*?)>(.*?)</a>"#);
regex!(TAG_HREF_ANCHOR, r#"(?is)<a\s+([^>]*?)href=['"]([^"']*?/tag/[^"']+)['"]([^>]*?)>(.*?)</a>"#);
regex!(DATE_HREF_ANCHOR, r#"(?is)<a\s+([^>]*?)href=['"]([^"']*?\d{4}/\d{2}(?:/\d{2})?/)['"]([^>]*?)>(.*?)</a>"#);
regex!(AUTHOR_HREF_ANCHOR, r#"(?is)<a\s+([^>]*?)href=['"]([^"']*?/author/[^"']+)['"]([^>]*?)>(.*?)</a>"#);
regex!(AUTHOR_REL_ANCHOR, r#"(?is)<a\s+([^>]*?)rel=['"]author['"]([^>]*?)>(.*?)</a>"#);

// Output path derivation.
regex!(FEED_PATH, r"/(?:feed|rss|atom)(?:/.*)?$");
regex!(FILE_EXTENSION, r"(?i)\.[a-z0-9]+$");

// Stylesheet and script conversion.
regex!(CSS_URL, r#"url\s*\(\s*['"]?([^'")]+)['"]?\s*\)"#);
regex!(CSS_IMPORT, r#"@import\s+['"]([^'")]+)['"]"#);
regex!(JS_REST_ENDPOINT, r#"/wp-json/[^'"\s]*"#);

pub(crate) const AJAX_ENDPOINT: &str = "/wp-admin/admin-ajax.php";
