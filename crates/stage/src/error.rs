//! Stage Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A staging error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for staging operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The staging root could not be created, removed or written.
    #[display("staging I/O failed: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// A page address has no output path.
    #[display("no output path for {_0}")]
    Unmappable(#[error(not(source))] String),
    /// An include path failed its safety checks. Carries the path and why.
    #[display("include path {} rejected: {_1}", _0.display())]
    Rejected(#[error(not(source))] PathBuf, #[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
