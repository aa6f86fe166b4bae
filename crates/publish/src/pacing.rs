//! Rate-limit pacing for the remote publishers.

use crate::error::{ErrorKind, Result};
use std::time::Duration;
use stillpress_config::Tuning;
use tokio_util::sync::CancellationToken;

/// Batch sizes, pauses and retry ladders, as durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    pub batch_size: usize,
    pub github_batch_pause: Duration,
    pub gitlab_batch_pause: Duration,
    pub blob_concurrency: usize,
    pub blob_chunk_pause: Duration,
    /// Waits before each retry round of blobs that failed in parallel.
    pub parallel_backoff: Vec<Duration>,
    /// Waits before each retry of a single blob in sequential mode.
    pub sequential_backoff: Vec<Duration>,
    pub rate_limit_cooldown: Duration,
    pub bucket_pause: Duration,
}
impl From<&Tuning> for Pacing {
    fn from(tuning: &Tuning) -> Self {
        let secs = |values: &[u64]| values.iter().copied().map(Duration::from_secs).collect();
        Self {
            batch_size: tuning.upload_batch_size.max(1),
            github_batch_pause: Duration::from_millis(tuning.github_batch_pause_ms),
            gitlab_batch_pause: Duration::from_millis(tuning.gitlab_batch_pause_ms),
            blob_concurrency: tuning.blob_concurrency.max(1),
            blob_chunk_pause: Duration::from_millis(tuning.blob_chunk_pause_ms),
            parallel_backoff: secs(&tuning.parallel_backoff_secs),
            sequential_backoff: secs(&tuning.sequential_backoff_secs),
            rate_limit_cooldown: Duration::from_secs(tuning.rate_limit_cooldown_secs),
            bucket_pause: Duration::from_millis(tuning.cloudflare_bucket_pause_ms),
        }
    }
}
impl Default for Pacing {
    fn default() -> Self {
        Self::from(&Tuning::default())
    }
}
impl Pacing {
    /// No waiting at all, keeping the batch size and ladder lengths.
    #[cfg(test)]
    pub(crate) fn immediate(batch_size: usize) -> Self {
        let zeroed = |ladder: &[Duration]| vec![Duration::ZERO; ladder.len()];
        let base = Self::default();
        Self {
            batch_size,
            github_batch_pause: Duration::ZERO,
            gitlab_batch_pause: Duration::ZERO,
            blob_chunk_pause: Duration::ZERO,
            parallel_backoff: zeroed(&base.parallel_backoff),
            sequential_backoff: zeroed(&base.sequential_backoff),
            rate_limit_cooldown: Duration::ZERO,
            bucket_pause: Duration::ZERO,
            ..base
        }
    }
}

/// Sleep for `duration`, waking early with an error on cancellation.
pub(crate) async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    if duration.is_zero() {
        return ensure_running(cancel);
    }
    tokio::select! {
        () = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

pub(crate) fn ensure_running(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        exn::bail!(ErrorKind::Cancelled);
    }
    Ok(())
}
