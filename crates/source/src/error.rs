//! Content Source Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A content source error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for content source operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The snapshot file could not be read.
    #[display("could not read content snapshot: {}", _0.display())]
    Unreadable(#[error(not(source))] PathBuf),
    /// The snapshot file is not a valid export.
    #[display("malformed content snapshot: {}", _0.display())]
    Malformed(#[error(not(source))] PathBuf),
    /// The snapshot parsed, but is internally inconsistent.
    #[display("invalid content snapshot: {_0}")]
    Invalid(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreadable(_))
    }
}
