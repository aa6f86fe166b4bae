//! Text rewrite rules turning fetched pages and copied assets into
//! self-contained static output.
//!
//! Everything here works on strings with narrowly anchored patterns, never a
//! parsed document. Each rule is a pure function that can be tested alone.

mod archive;
mod assets;
mod consts;
pub mod error;
mod page;
mod path;
mod rewrite;
mod sanitize;

pub use crate::archive::{ArchiveToggles, neutralize};
pub use crate::assets::{AssetKind, convert as convert_asset};
pub use crate::page::{PageKind, Transformed, Transformer, UrlMode, Warning};
pub use crate::path::url_to_path;
pub use crate::rewrite::{BaseUrls, collapse_slashes, relative, relative_xml, strip_bases};
pub use crate::sanitize::strip_dynamic;
