//! Crawl Error Types

use derive_more::{Display, Error};

/// A crawl error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for crawl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures that stop enumeration or crawling as a whole. A single page that
/// can't be fetched is not one of these; see [`FetchFailure`](crate::FetchFailure).
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The content source could not answer a query.
    #[display("content source query failed: {_0}")]
    Source(#[error(not(source))] &'static str),
    /// The HTTP client could not be constructed.
    #[display("could not build HTTP client")]
    Client,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Source(_) => true,
            Self::Client => false,
        }
    }
}
