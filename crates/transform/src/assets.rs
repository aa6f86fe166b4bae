//! Rewriting inside stylesheets and scripts copied from the site.

use crate::consts::{AJAX_ENDPOINT, CSS_IMPORT, CSS_URL, JS_REST_ENDPOINT};
use crate::rewrite::{BaseUrls, strip_bases};
use regex::Captures;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Css,
    Js,
}
impl AssetKind {
    /// Classify a path by its extension; anything else is copied verbatim.
    pub fn from_path(path: &str) -> Option<Self> {
        let (_, ext) = path.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "css" => Some(Self::Css),
            "js" | "mjs" => Some(Self::Js),
            _ => None,
        }
    }
}

/// Rebase absolute site URLs in a stylesheet or script.
///
/// Stylesheets get `url()` and `@import` targets rebased. Scripts have the
/// AJAX and REST endpoints (which don't exist on a static copy) replaced
/// with `#`. Both get a final plain replacement of the base addresses.
pub fn convert(text: &str, kind: AssetKind, bases: &BaseUrls) -> String {
    let mut out = match kind {
        AssetKind::Css => {
            let out = CSS_URL.replace_all(text, |caps: &Captures| {
                let rebased = strip_bases(&caps[1], bases);
                match rebased == caps[1] {
                    true => caps[0].to_string(),
                    false => format!("url({rebased})"),
                }
            });
            CSS_IMPORT
                .replace_all(&out, |caps: &Captures| {
                    let rebased = strip_bases(&caps[1], bases);
                    match rebased == caps[1] {
                        true => caps[0].to_string(),
                        false => format!("@import \"{rebased}\""),
                    }
                })
                .into_owned()
        },
        AssetKind::Js => text.to_string(),
    };
    out = strip_bases(&out, bases);
    if kind == AssetKind::Js {
        out = out.replace(AJAX_ENDPOINT, "#");
        out = JS_REST_ENDPOINT.replace_all(&out, "#").into_owned();
    }
    out
}
