//! Journal Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A journal error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for journal operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not read {}", _0.display())]
    Read(#[error(not(source))] PathBuf),
    #[display("could not write {}", _0.display())]
    Write(#[error(not(source))] PathBuf),
    #[display("malformed state file {}", _0.display())]
    Malformed(#[error(not(source))] PathBuf),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Read(_) | Self::Write(_))
    }
}
