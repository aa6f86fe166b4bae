//! The persisted run state machine polled by `status` and `cancel`.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stillpress_journal::{read_json, write_json};
use time::OffsetDateTime;

pub const STATE_FILE: &str = "run.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    #[display("idle")]
    Idle,
    #[display("running")]
    Running,
    #[display("cancel requested")]
    CancelRequested,
    #[display("completed")]
    Completed,
    #[display("completed with errors")]
    CompletedWithErrors,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    pub status: Status,
    pub run_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    /// Error entries the finished run logged.
    pub errors: u64,
}
impl RunState {
    /// Running, or running with a cancel pending.
    pub fn is_active(&self) -> bool {
        matches!(self.status, Status::Running | Status::CancelRequested)
    }

    /// An active state that has outlived `ttl`, left behind by a run that
    /// never finished.
    pub fn is_stale(&self, now: OffsetDateTime, ttl: Duration) -> bool {
        self.is_active() && self.started_at.is_none_or(|started| now - started > ttl)
    }

    /// Enter `running` for `run_id`. Fails while another run is active,
    /// unless its state is stale.
    pub fn start(&mut self, run_id: &str, now: OffsetDateTime, ttl: Duration) -> Result<()> {
        if self.is_active() {
            if !self.is_stale(now, ttl) {
                exn::bail!(ErrorKind::AlreadyRunning);
            }
            tracing::warn!(run_id = ?self.run_id, "Replacing stale running state");
        }
        *self = Self {
            status: Status::Running,
            run_id: Some(run_id.to_string()),
            started_at: Some(now),
            finished_at: None,
            errors: 0,
        };
        Ok(())
    }

    /// Ask the active run to stop at its next checkpoint. Asking twice is
    /// fine.
    pub fn request_cancel(&mut self) -> Result<()> {
        match self.status {
            Status::Running | Status::CancelRequested => {
                self.status = Status::CancelRequested;
                Ok(())
            },
            _ => exn::bail!(ErrorKind::NotRunning),
        }
    }

    /// Close the active run with its error count.
    pub fn finish(&mut self, errors: u64, now: OffsetDateTime) -> Result<Status> {
        if !self.is_active() {
            exn::bail!(ErrorKind::NotRunning);
        }
        self.status = match errors {
            0 => Status::Completed,
            _ => Status::CompletedWithErrors,
        };
        self.finished_at = Some(now);
        self.errors = errors;
        Ok(self.status)
    }

    /// Drop back to idle from anywhere.
    pub fn cancel(&mut self) {
        *self = Self::default();
    }
}

/// `run.json` in a state directory.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}
impl StateFile {
    pub fn new(state_dir: &Path) -> Self {
        Self { path: state_dir.join(STATE_FILE) }
    }

    /// A missing file reads as idle.
    pub fn load(&self) -> Result<RunState> {
        let state = read_json(&self.path).or_raise(|| ErrorKind::State(self.path.clone()))?;
        Ok(state.unwrap_or_default())
    }

    pub fn save(&self, state: &RunState) -> Result<()> {
        write_json(&self.path, state).or_raise(|| ErrorKind::State(self.path.clone()))
    }

    /// Load, apply `change`, and save only if it succeeded.
    pub fn update<T>(&self, change: impl FnOnce(&mut RunState) -> Result<T>) -> Result<T> {
        let mut state = self.load()?;
        let out = change(&mut state)?;
        self.save(&state)?;
        Ok(out)
    }
}
