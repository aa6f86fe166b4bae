//! File metadata returned by storage backends.

use std::path::PathBuf;
use time::UtcDateTime;

/// File metadata returned by storage backends.
///
/// Used when walking a site source tree for assets, when listing the staged
/// output before publishing, and when diffing against a publish target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: UtcDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: UtcDateTime) -> Self {
        Self { path: path.into(), size, modified }
    }

    /// Forward-slash form of the relative path, as used in URLs, archives and
    /// remote trees regardless of the host platform.
    pub fn slash_path(&self) -> String {
        crate::to_slash(&self.path)
    }

    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        self.path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase)
    }
}
