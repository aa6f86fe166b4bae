//! Neutralize links into disabled archive types.
//!
//! When an archive type isn't generated, links pointing at it would 404 on
//! the static copy. Each such anchor becomes a bare `<span>` holding only the
//! original link text. Matching is pattern based, anchored on the `<a` and
//! `</a>` boundaries, and never parses the document.

use crate::consts::{AUTHOR_HREF_ANCHOR, AUTHOR_REL_ANCHOR, DATE_HREF_ANCHOR, TAG_HREF_ANCHOR, TAG_REL_ANCHOR};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which archive types are generated for this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveToggles {
    pub tags: bool,
    pub dates: bool,
    pub authors: bool,
}

pub fn neutralize(html: &str, toggles: ArchiveToggles) -> String {
    let mut out = html.to_string();
    if !toggles.tags {
        out = unlink(&out, &TAG_REL_ANCHOR, 3);
        out = unlink(&out, &TAG_HREF_ANCHOR, 4);
    }
    if !toggles.dates {
        out = unlink(&out, &DATE_HREF_ANCHOR, 4);
    }
    if !toggles.authors {
        out = unlink(&out, &AUTHOR_HREF_ANCHOR, 4);
        out = unlink(&out, &AUTHOR_REL_ANCHOR, 3);
    }
    out
}

fn unlink(html: &str, pattern: &Regex, text_group: usize) -> String {
    pattern.replace_all(html, format!("<span>${{{text_group}}}</span>").as_str()).into_owned()
}
