//! Content models as exported by the CMS.

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcDateTime};

fn default_posts_per_page() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

/// Site-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInfo {
    /// Public front-end address, e.g. `https://example.com`.
    pub home_url: String,
    /// Where the CMS itself lives. Usually the same as `home_url`, but a
    /// site installed in a subdirectory has them differ.
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default = "default_posts_per_page")]
    pub posts_per_page: u32,
    /// Number of published items listed on the home page.
    #[serde(default)]
    pub published_posts: u64,
    pub theme: Theme,
    #[serde(default)]
    pub site_icon: Option<u64>,
    #[serde(default)]
    pub custom_logo: Option<u64>,
    #[serde(default)]
    pub header_image: Option<u64>,
    #[serde(default)]
    pub background_image: Option<u64>,
}
impl SiteInfo {
    pub fn site_url(&self) -> &str {
        self.site_url.as_deref().unwrap_or(&self.home_url)
    }
}

/// Active theme. `template` names the parent theme for a child theme, and is
/// equal to `stylesheet` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub stylesheet: String,
    #[serde(default)]
    pub template: Option<String>,
}
impl Theme {
    /// The parent theme's slug, if this is a child theme.
    pub fn parent(&self) -> Option<&str> {
        self.template.as_deref().filter(|t| *t != self.stylesheet)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentType {
    pub name: String,
    #[serde(default = "default_true")]
    pub public: bool,
    #[serde(default)]
    pub builtin: bool,
    /// Archive root for types that declare one.
    #[serde(default)]
    pub archive_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Publish,
    Draft,
    Pending,
    Private,
    Future,
    Trash,
}

/// A single piece of content: post, page, or custom type item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: u64,
    pub content_type: String,
    pub url: String,
    pub status: Status,
    #[serde(with = "time::serde::rfc3339")]
    pub published: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
    #[serde(default)]
    pub featured_media: Option<u64>,
    /// Raw stored content, before the CMS renders it.
    #[serde(default)]
    pub content: String,
}
impl Entity {
    pub fn modified_utc(&self) -> UtcDateTime {
        self.modified.to_utc()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub name: String,
    #[serde(default = "default_true")]
    pub public: bool,
    #[serde(default)]
    pub builtin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: u64,
    pub taxonomy: String,
    pub url: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: u64,
    pub url: String,
    #[serde(default)]
    pub post_count: u64,
}

/// A media library item. `file` is relative to the uploads directory and
/// `sizes` lists the generated variants, which live next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: u64,
    pub file: String,
    #[serde(default)]
    pub sizes: Vec<String>,
}
impl Attachment {
    /// Relative upload paths of the original and every size variant.
    pub fn files(&self) -> Vec<String> {
        let dir = match self.file.rfind('/') {
            Some(i) => &self.file[..=i],
            None => "",
        };
        std::iter::once(self.file.clone()).chain(self.sizes.iter().map(|s| format!("{dir}{s}"))).collect()
    }

    pub fn extension(&self) -> Option<String> {
        let name = self.file.rsplit('/').next()?;
        let (_, ext) = name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }
}
