//! The run's user-facing log and progress state.
//!
//! Diagnostics go through `tracing` like everywhere else. What lives here is
//! the record an operator reads afterwards (`stillpress logs`) and the
//! progress a poller watches during a run (`stillpress status`), both
//! persisted as JSON in the state directory so another process can read them.

pub mod error;
mod journal;
mod progress;
mod state;

pub use crate::journal::{Entry, Journal, Level, MAX_ENTRIES};
pub use crate::progress::Progress;
pub use crate::state::{read_json, write_json};

/// Where pipeline stages report to.
///
/// Implementations must never fail the caller: a sink that cannot persist
/// keeps going in memory.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn update_progress(&self, current: u64, total: u64, status: &str);

    fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }

    fn warning(&self, message: &str) {
        self.log(Level::Warning, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }
}
