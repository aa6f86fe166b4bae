//! Runs the snapshot pipeline once, guarded by the run lock and the
//! persisted run state.
//!
//! [`Engine::run`] is the single entry point. A run is rejected while
//! another is active; [`StateFile`] lets other processes poll its status
//! or ask it to stop.

pub mod error;
mod lock;
mod run;
mod state;

pub use crate::lock::{LOCK_FILE, RunLock};
pub use crate::run::{CACHE_FILE, Engine, RunOutcome};
pub use crate::state::{RunState, STATE_FILE, StateFile, Status};
