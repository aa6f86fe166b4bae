use crate::error::Result;
use crate::progress::Progress;
use crate::{LogSink, read_json, write_json};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use time::OffsetDateTime;

/// Oldest entries are dropped beyond this.
pub const MAX_ENTRIES: usize = 1000;
const FLUSH_THRESHOLD: usize = 10;
const JOURNAL_FILE: &str = "journal.json";
const PROGRESS_FILE: &str = "progress.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[display("ERROR")]
    Error,
    #[display("WARNING")]
    Warning,
    #[display("INFO")]
    Info,
    #[display("DEBUG")]
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    /// Milliseconds since the run started.
    pub elapsed_ms: u64,
    pub level: Level,
    pub message: String,
}
impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let elapsed = self.elapsed_ms as f64 / 1000.0;
        write!(f, "[+{elapsed:.1}s] {:<7} {}", self.level, self.message)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: VecDeque<Entry>,
    pending: Vec<Entry>,
    errors: u64,
    warnings: u64,
    progress: Progress,
}

/// Buffered, bounded run log.
///
/// Info and debug entries are held back until ten have accumulated. Errors and
/// warnings flush immediately, taking anything buffered before them along.
#[derive(Debug)]
pub struct Journal {
    dir: Option<PathBuf>,
    debug: bool,
    started: Instant,
    inner: Mutex<Inner>,
}
impl Journal {
    /// A journal persisting to `journal.json` and `progress.json` in `dir`,
    /// which must exist. Earlier entries are picked up so that a new run
    /// appends until [`clear`](Self::clear) is called.
    pub fn open(dir: impl Into<PathBuf>, debug: bool) -> Result<Self> {
        let dir = dir.into();
        let entries: Vec<Entry> = read_json(&dir.join(JOURNAL_FILE))?.unwrap_or_default();
        let inner = Inner { entries: entries.into(), ..Default::default() };
        Ok(Self { dir: Some(dir), debug, started: Instant::now(), inner: Mutex::new(inner) })
    }

    /// A journal that never touches the filesystem.
    pub fn in_memory(debug: bool) -> Self {
        Self { dir: None, debug, started: Instant::now(), inner: Mutex::default() }
    }

    /// Entries persisted in a state directory, oldest first.
    pub fn read(dir: impl AsRef<Path>) -> Result<Vec<Entry>> {
        Ok(read_json(&dir.as_ref().join(JOURNAL_FILE))?.unwrap_or_default())
    }

    /// Progress persisted in a state directory.
    pub fn read_progress(dir: impl AsRef<Path>) -> Result<Progress> {
        Ok(read_json(&dir.as_ref().join(PROGRESS_FILE))?.unwrap_or_default())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget everything from previous runs and reset progress.
    pub fn clear(&self) {
        let mut inner = self.lock();
        *inner = Inner::default();
        drop(inner);
        self.persist_entries(&[]);
        self.persist_progress(&Progress::default());
    }

    /// Write out buffered entries.
    pub fn flush(&self) {
        let mut inner = self.lock();
        if inner.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut inner.pending);
        inner.entries.extend(pending);
        let excess = inner.entries.len().saturating_sub(MAX_ENTRIES);
        inner.entries.drain(..excess);
        let snapshot: Vec<Entry> = inner.entries.iter().cloned().collect();
        drop(inner);
        self.persist_entries(&snapshot);
    }

    /// Flushed and buffered entries, oldest first.
    pub fn entries(&self) -> Vec<Entry> {
        let inner = self.lock();
        inner.entries.iter().chain(inner.pending.iter()).cloned().collect()
    }

    /// Error entries recorded since the last clear, including any that
    /// have since been dropped from the bounded history.
    pub fn error_count(&self) -> u64 {
        self.lock().errors
    }

    pub fn warning_count(&self) -> u64 {
        self.lock().warnings
    }

    pub fn progress(&self) -> Progress {
        self.lock().progress.clone()
    }

    fn persist_entries(&self, entries: &[Entry]) {
        let Some(dir) = &self.dir else {
            return;
        };
        if let Err(e) = write_json(&dir.join(JOURNAL_FILE), &entries) {
            tracing::warn!(error = %e.deref(), "Could not persist journal");
        }
    }

    fn persist_progress(&self, progress: &Progress) {
        let Some(dir) = &self.dir else {
            return;
        };
        if let Err(e) = write_json(&dir.join(PROGRESS_FILE), progress) {
            tracing::warn!(error = %e.deref(), "Could not persist progress");
        }
    }
}

impl LogSink for Journal {
    fn log(&self, level: Level, message: &str) {
        if level == Level::Debug && !self.debug {
            return;
        }
        match level {
            Level::Error => tracing::error!(target: "stillpress::journal", "{message}"),
            Level::Warning => tracing::warn!(target: "stillpress::journal", "{message}"),
            Level::Info => tracing::info!(target: "stillpress::journal", "{message}"),
            Level::Debug => tracing::debug!(target: "stillpress::journal", "{message}"),
        }
        let entry = Entry {
            at: OffsetDateTime::now_utc(),
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            level,
            message: message.to_string(),
        };
        let mut inner = self.lock();
        match level {
            Level::Error => inner.errors += 1,
            Level::Warning => inner.warnings += 1,
            _ => {},
        }
        inner.pending.push(entry);
        let urgent = level <= Level::Warning;
        let full = inner.pending.len() >= FLUSH_THRESHOLD;
        drop(inner);
        if urgent || full {
            self.flush();
        }
    }

    fn update_progress(&self, current: u64, total: u64, status: &str) {
        let progress = Progress::new(current, total, status);
        tracing::debug!(current, total, percentage = progress.percentage, status, "Progress");
        self.lock().progress = progress.clone();
        self.persist_progress(&progress);
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        self.flush();
    }
}
