//! The run lock: a file created with `create_new`, held only while a run
//! moves into the running state.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

pub const LOCK_FILE: &str = "run.lock";
/// Create is retried once after a stale or malformed lock is removed.
const MAX_ATTEMPTS: usize = 2;
/// An unparsable lock younger than this may still be mid-write.
const MALFORMED_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockRecord {
    value: String,
    #[serde(with = "time::serde::rfc3339")]
    acquired_at: OffsetDateTime,
}

/// A held run lock. Dropping it does not release it; call
/// [`release`](Self::release).
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    value: String,
}
impl RunLock {
    /// Acquire the lock in `state_dir` or fail with
    /// [`AlreadyRunning`](ErrorKind::AlreadyRunning).
    ///
    /// A lock older than `timeout` is taken over, as is a lock file that
    /// cannot be parsed.
    pub fn acquire(state_dir: &Path, timeout: Duration) -> Result<Self> {
        let path = state_dir.join(LOCK_FILE);
        let value = Uuid::new_v4().to_string();
        for _ in 0..MAX_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let record = LockRecord { value: value.clone(), acquired_at: OffsetDateTime::now_utc() };
                    let written = serde_json::to_vec(&record)
                        .or_raise(|| ErrorKind::Lock(path.clone()))
                        .and_then(|bytes| file.write_all(&bytes).or_raise(|| ErrorKind::Lock(path.clone())));
                    if let Err(e) = written {
                        remove_partial(&path);
                        return Err(e);
                    }
                    tracing::debug!(path = %path.display(), "Acquired run lock");
                    return Ok(Self { path, value });
                },
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if !reclaim(&path, timeout)? {
                        exn::bail!(ErrorKind::AlreadyRunning);
                    }
                },
                Err(e) => return Err(e).or_raise(|| ErrorKind::Lock(path)),
            }
        }
        exn::bail!(ErrorKind::AlreadyRunning)
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Remove the lock file if it is still ours.
    pub fn release(self) -> Result<()> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Lock(self.path.clone())),
        };
        match serde_json::from_slice::<LockRecord>(&bytes) {
            Ok(record) if record.value == self.value => remove_if_unchanged(&self.path, &bytes).map(|_| ()),
            _ => {
                tracing::warn!(path = %self.path.display(), "Run lock was taken over; leaving it in place");
                Ok(())
            },
        }
    }

    /// Remove whatever lock exists in `state_dir`. Returns whether there was
    /// one.
    pub fn force_clear(state_dir: &Path) -> Result<bool> {
        let path = state_dir.join(LOCK_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).or_raise(|| ErrorKind::Lock(path)),
        }
    }
}

/// Drop a lock file whose record never got written. Returns whether it is
/// gone; a leftover is reclaimed as malformed by a later run.
fn remove_partial(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not remove partially written run lock");
            false
        },
    }
}

/// Decide whether an existing lock may be removed, and remove it. Returns
/// `false` when the lock is live.
fn reclaim(path: &Path, timeout: Duration) -> Result<bool> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e).or_raise(|| ErrorKind::Lock(path.to_path_buf())),
    };
    match serde_json::from_slice::<LockRecord>(&bytes) {
        Ok(record) => {
            let age = OffsetDateTime::now_utc() - record.acquired_at;
            if age < timeout {
                return Ok(false);
            }
            tracing::warn!(path = %path.display(), age = %age, "Reclaiming stale run lock");
        },
        Err(_) => {
            let settled = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_none_or(|elapsed| elapsed >= MALFORMED_GRACE);
            if !settled {
                return Ok(false);
            }
            tracing::warn!(path = %path.display(), "Removing malformed run lock");
        },
    }
    remove_if_unchanged(path, &bytes)
}

/// Delete `path` only if it still holds `expected`. Returns whether the lock
/// is gone.
fn remove_if_unchanged(path: &Path, expected: &[u8]) -> Result<bool> {
    match std::fs::read(path) {
        Ok(current) if current == expected => {},
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e).or_raise(|| ErrorKind::Lock(path.to_path_buf())),
    }
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e).or_raise(|| ErrorKind::Lock(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn write_record(dir: &Path, value: &str, acquired_at: OffsetDateTime) {
        let record = LockRecord { value: value.to_string(), acquired_at };
        std::fs::write(dir.join(LOCK_FILE), serde_json::to_vec(&record).unwrap()).unwrap();
    }

    #[test]
    fn test_second_acquire_is_rejected_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunLock::acquire(dir.path(), HOUR).unwrap();
        let err = RunLock::acquire(dir.path(), HOUR).unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyRunning));

        first.release().unwrap();
        assert!(!dir.path().join(LOCK_FILE).exists());
        RunLock::acquire(dir.path(), HOUR).unwrap();
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        write_record(dir.path(), "crashed", OffsetDateTime::now_utc() - time::Duration::hours(2));
        let lock = RunLock::acquire(dir.path(), HOUR).unwrap();
        assert_ne!(lock.value(), "crashed");
    }

    #[test]
    fn test_fresh_foreign_lock_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        write_record(dir.path(), "other", OffsetDateTime::now_utc() - time::Duration::minutes(5));
        let err = RunLock::acquire(dir.path(), HOUR).unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyRunning));
    }

    #[test]
    fn test_release_leaves_a_taken_over_lock() {
        let dir = tempfile::tempdir().unwrap();
        let lock = RunLock::acquire(dir.path(), HOUR).unwrap();
        write_record(dir.path(), "successor", OffsetDateTime::now_utc());
        lock.release().unwrap();
        assert!(dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn test_remove_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE);
        std::fs::write(&path, b"").unwrap();
        assert!(remove_partial(&path));
        assert!(!path.exists());
        assert!(remove_partial(&path));

        // A directory can't be removed as a file; it is reported and left.
        std::fs::create_dir(&path).unwrap();
        assert!(!remove_partial(&path));
        assert!(path.is_dir());
    }

    #[test]
    fn test_force_clear() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!RunLock::force_clear(dir.path()).unwrap());
        let _lock = RunLock::acquire(dir.path(), HOUR).unwrap();
        assert!(RunLock::force_clear(dir.path()).unwrap());
        RunLock::acquire(dir.path(), HOUR).unwrap();
    }
}
