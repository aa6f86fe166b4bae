//! Publish Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A publish error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for publish operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures that end one destination's publish. Other destinations carry on.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The staged tree or a local target could not be read or written.
    #[display("publish I/O failed: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// The HTTP client could not be constructed.
    #[display("could not build HTTP client")]
    Client,
    /// A request never got a response.
    #[display("request to {_0} failed")]
    Transport(#[error(not(source))] String),
    /// The remote answered with an unexpected status. Carries the status and
    /// the API's own message.
    #[display("API returned {_0}: {_1}")]
    Api(#[error(not(source))] u16, #[error(not(source))] String),
    /// The hourly request allowance is used up.
    #[display("API rate limit exhausted; try again later")]
    RateLimited,
    /// Too many requests in a short time; the API asks for a pause.
    #[display("secondary rate limit hit")]
    SecondaryRateLimit,
    /// A successful response lacked a field the protocol needs.
    #[display("malformed API response: missing {_0}")]
    InvalidResponse(#[error(not(source))] &'static str),
    /// The staged tree exceeds what the destination accepts.
    #[display("{_0} files exceed the limit of {_1}")]
    TooManyFiles(#[error(not(source))] usize, #[error(not(source))] usize),
    /// No acceptable `git` executable was found.
    #[display("git executable not found in an allowed location")]
    GitNotFound,
    /// The configured working directory is not a git repository.
    #[display("not a git repository: {}", _0.display())]
    NotARepository(#[error(not(source))] PathBuf),
    /// A git command exited unsuccessfully. Carries the subcommand and its
    /// sanitized output.
    #[display("git {_0} failed: {_1}")]
    Git(#[error(not(source))] &'static str, #[error(not(source))] String),
    /// The archive could not be written.
    #[display("could not write archive {}", _0.display())]
    Archive(#[error(not(source))] PathBuf),
    /// A required target setting is absent.
    #[display("missing setting `{_0}`")]
    Misconfigured(#[error(not(source))] &'static str),
    /// The run was cancelled between batches.
    #[display("cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::SecondaryRateLimit)
    }
}
