//! Asset Error Types

use derive_more::{Display, Error};

/// An asset collection error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for asset collection.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The content source could not answer a query.
    #[display("content source query failed: {_0}")]
    Source(#[error(not(source))] &'static str),
    /// A tree could not be listed or read.
    #[display("could not read {_0}")]
    Storage(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        true
    }
}
