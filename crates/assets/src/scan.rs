//! Reference extraction from generated pages, stylesheets and stored content.
//!
//! Everything here is a pure function over text. The collector decides what
//! to do with the paths it gets back.

use crate::consts::{
    CSS_IMPORT, CSS_URL, GALLERY_IDS, IMG_SRC, LINK_HREF, SCRIPT_SRC, SRCSET, SRCSET_DESCRIPTOR, WP_IMAGE_CLASS,
    YEAR_MONTH,
};
use std::collections::BTreeSet;
use stillpress_source::models::{Entity, SiteInfo};

/// Every asset address a page mentions: stylesheet links, script and image
/// sources, each `srcset` candidate and every `url()` value.
pub fn page_references(html: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for pattern in [&*LINK_HREF, &*SCRIPT_SRC, &*IMG_SRC, &*CSS_URL] {
        refs.extend(pattern.captures_iter(html).map(|c| c[1].to_string()));
    }
    for caps in SRCSET.captures_iter(html) {
        for candidate in caps[1].split(',') {
            let candidate = SRCSET_DESCRIPTOR.replace(candidate.trim(), "");
            let candidate = candidate.trim();
            if !candidate.is_empty() {
                refs.push(candidate.to_string());
            }
        }
    }
    refs
}

/// `@import "…"` targets and `url()` values of a stylesheet. `@import url(…)`
/// is covered by the latter.
pub fn stylesheet_references(css: &str) -> Vec<String> {
    CSS_IMPORT
        .captures_iter(css)
        .chain(CSS_URL.captures_iter(css))
        .map(|c| c[1].to_string())
        .collect()
}

fn strip_query(reference: &str) -> &str {
    let end = reference.find(['?', '#']).unwrap_or(reference.len());
    &reference[..end]
}

/// Site-relative path of a reference into `area` (say `wp-content/plugins`).
///
/// Absolute URLs, root-relative paths and already relative paths all work as
/// long as `area/` appears on a segment boundary. Query strings and fragments
/// are dropped. A reference with a `..` segment, or one naming the area
/// itself or a directory, gives `None`.
///
/// ```
/// use stillpress_assets::scan::locate;
/// assert_eq!(
///     locate("https://example.com/wp-content/plugins/forms/a.css?ver=2", "wp-content/plugins").as_deref(),
///     Some("wp-content/plugins/forms/a.css")
/// );
/// assert_eq!(locate("/wp-content/plugins/../../wp-config.php", "wp-content/plugins"), None);
/// ```
pub fn locate(reference: &str, area: &str) -> Option<String> {
    let path = strip_query(reference.trim());
    let needle = format!("{area}/");
    let mut from = 0;
    let start = loop {
        let i = from + path[from..].find(&needle)?;
        if i == 0 || path[..i].ends_with('/') {
            break i;
        }
        from = i + needle.len();
    };
    let rest = &path[start + needle.len()..];
    if rest.is_empty() || rest.ends_with('/') || rest.split('/').any(|s| s == ".." || s == "." || s.is_empty()) {
        return None;
    }
    Some(format!("{area}/{rest}"))
}

/// Resolve a stylesheet reference found in the file at `base_dir` (site
/// relative) to a site-relative path inside `area`.
///
/// `data:` and fragment references give `None`. Absolute and root-relative
/// references go through [`locate`]. Relative ones are joined onto
/// `base_dir` with `..` resolved; climbing above the site root, or landing
/// outside `area`, gives `None`.
pub fn resolve(reference: &str, base_dir: &str, area: &str) -> Option<String> {
    let path = strip_query(reference.trim());
    if path.is_empty() || path.starts_with("data:") {
        return None;
    }
    if path.contains("://") || path.starts_with('/') {
        return locate(path, area);
    }
    let mut parts: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in path.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                parts.pop()?;
            },
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    joined.starts_with(&format!("{area}/")).then_some(joined)
}

/// Uploads that are not media library items: anything under `uploads` but
/// outside the `YYYY/MM/` layout, such as plugin-generated stylesheets.
pub fn generated_upload(reference: &str, uploads: &str) -> Option<String> {
    let path = locate(reference, uploads)?;
    let inner = &path[uploads.len() + 1..];
    (!YEAR_MONTH.is_match(inner)).then_some(path)
}

/// Attachment ids the published site shows: featured images, inline
/// `wp-image-N` markers, gallery shortcode id lists, the site icon and the
/// customizer logo, header and background images.
pub fn attachment_ids<'a>(site: &SiteInfo, entities: impl IntoIterator<Item = &'a Entity>) -> BTreeSet<u64> {
    let mut ids = BTreeSet::new();
    for entity in entities {
        ids.extend(entity.featured_media);
        ids.extend(WP_IMAGE_CLASS.captures_iter(&entity.content).filter_map(|c| c[1].parse::<u64>().ok()));
        for caps in GALLERY_IDS.captures_iter(&entity.content) {
            ids.extend(caps[1].split(',').filter_map(|id| id.trim().parse::<u64>().ok()));
        }
    }
    ids.extend(site.site_icon);
    ids.extend(site.custom_logo);
    ids.extend(site.header_image);
    ids.extend(site.background_image);
    ids.remove(&0);
    ids
}
