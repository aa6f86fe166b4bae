use regex::Regex;
use std::sync::LazyLock;

macro_rules! regex {
    ($name:ident, $regex:expr) => {
        pub(crate) static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($regex).unwrap());
    };
}

// Attribute references in generated pages.
regex!(LINK_HREF, r#"(?i)<link[^>]+href=["']([^"']+)["']"#);
regex!(SCRIPT_SRC, r#"(?i)<script[^>]+src=["']([^"']+)["']"#);
regex!(IMG_SRC, r#"(?i)<img[^>]+src=["']([^"']+)["']"#);
regex!(SRCSET, r#"(?i)srcset=["']([^"']+)["']"#);
regex!(SRCSET_DESCRIPTOR, r"\s+\d+(?:\.\d+)?[wx]$");

// Stylesheet references, in pages and in CSS files.
regex!(CSS_URL, r#"url\(\s*["']?([^"')\s]+)["']?\s*\)"#);
regex!(CSS_IMPORT, r#"@import\s+["']([^"']+)["']"#);

// Attachment markers in stored content.
regex!(WP_IMAGE_CLASS, r"wp-image-(\d+)");
regex!(GALLERY_IDS, r#"\[gallery[^\]]*ids=["']([^"']+)["']"#);

// Media library uploads live under YYYY/MM/.
regex!(YEAR_MONTH, r"^\d{4}/\d{2}/");
