//! Engine Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures that stop a run before or while it executes. Per-page, per-file
/// and per-destination failures never surface here; they go to the journal.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Settings could not be loaded or failed validation.
    #[display("configuration is not usable")]
    Config,
    /// Another run holds the lock or the running state.
    #[display("a run is already in progress")]
    AlreadyRunning,
    /// A transition needed an active run and there is none.
    #[display("no run is in progress")]
    NotRunning,
    /// The run lock file could not be created, read or removed.
    #[display("run lock {} is unusable", _0.display())]
    Lock(#[error(not(source))] PathBuf),
    /// The state directory or a state file could not be read or written.
    #[display("run state {} is unusable", _0.display())]
    State(#[error(not(source))] PathBuf),
    /// A setting the run needs was left empty.
    #[display("setting `{_0}` is required")]
    Missing(#[error(not(source))] &'static str),
    /// The content source could not be opened.
    #[display("content source could not be loaded")]
    Source,
    /// The page list could not be built.
    #[display("pages could not be enumerated")]
    Enumerate,
    /// The page fetcher could not be constructed.
    #[display("could not prepare the crawler")]
    Crawler,
    /// The staging root could not be created.
    #[display("staging root could not be prepared")]
    Staging,
    /// The run stopped at a cancellation checkpoint.
    #[display("run was cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Lock(_) | Self::State(_))
    }
}
