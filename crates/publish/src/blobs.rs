//! Blob creation for tree-building hosts.
//!
//! Blobs go up in parallel chunks. Transport failures are collected and
//! retried sequentially after each wait of the parallel ladder. A secondary
//! rate limit stops the parallel phase outright: after a cooldown everything
//! still missing is created one at a time.

use crate::error::{Error, ErrorKind, Result};
use crate::host::StagedBlob;
use crate::pacing::{Pacing, ensure_running, pause};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use stillpress_journal::LogSink;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub(crate) trait BlobApi: Send + Sync {
    /// Upload one blob, returning its id.
    async fn create_blob(&self, content: &[u8]) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CreatedBlob {
    pub path: String,
    pub sha: String,
}

pub(crate) async fn create_blobs(
    api: &dyn BlobApi,
    files: &[StagedBlob],
    pacing: &Pacing,
    cancel: &CancellationToken,
    sink: &dyn LogSink,
) -> Result<Vec<CreatedBlob>> {
    let mut created = Vec::with_capacity(files.len());
    let mut failed: Vec<&StagedBlob> = Vec::new();
    let mut last_error: Option<Error> = None;
    let chunks: Vec<&[StagedBlob]> = files.chunks(pacing.blob_concurrency.max(1)).collect();
    let total = chunks.len();
    for (index, chunk) in chunks.into_iter().enumerate() {
        ensure_running(cancel)?;
        let results = join_all(chunk.iter().map(|file| api.create_blob(&file.content))).await;
        let mut throttled = false;
        for (file, result) in chunk.iter().zip(results) {
            match result {
                Ok(sha) => created.push(CreatedBlob { path: file.path.clone(), sha }),
                Err(e) if matches!(&*e, ErrorKind::SecondaryRateLimit) => throttled = true,
                Err(e) if e.is_retryable() => {
                    tracing::debug!(path = %file.path, "Blob upload failed in transit; queued for retry");
                    failed.push(file);
                    last_error = Some(e);
                },
                Err(e) => return Err(e),
            }
        }
        if throttled {
            sink.warning(&format!(
                "Secondary rate limit hit; waiting {}s and continuing one blob at a time",
                pacing.rate_limit_cooldown.as_secs()
            ));
            pause(pacing.rate_limit_cooldown, cancel).await?;
            let done: HashSet<&str> = created.iter().map(|b| b.path.as_str()).collect();
            let remaining: Vec<&StagedBlob> = files.iter().filter(|f| !done.contains(f.path.as_str())).collect();
            created.extend(create_sequential(api, &remaining, pacing, cancel).await?);
            return Ok(created);
        }
        if index + 1 < total {
            pause(pacing.blob_chunk_pause, cancel).await?;
        }
    }

    if failed.is_empty() {
        return Ok(created);
    }
    tracing::debug!(failed = failed.len(), "Retrying failed blob uploads sequentially");
    for delay in &pacing.parallel_backoff {
        pause(*delay, cancel).await?;
        match create_sequential(api, &failed, pacing, cancel).await {
            Ok(retried) => {
                created.extend(retried);
                return Ok(created);
            },
            Err(e) if matches!(&*e, ErrorKind::Cancelled) => return Err(e),
            Err(e) => last_error = Some(e),
        }
    }
    sink.error(&format!("{} blobs could not be uploaded after retrying", failed.len()));
    match last_error {
        Some(e) => Err(e),
        None => exn::bail!(ErrorKind::Transport("blob upload".to_string())),
    }
}

/// One blob at a time, each retried along the sequential ladder.
async fn create_sequential(
    api: &dyn BlobApi,
    files: &[&StagedBlob],
    pacing: &Pacing,
    cancel: &CancellationToken,
) -> Result<Vec<CreatedBlob>> {
    let mut created = Vec::with_capacity(files.len());
    for file in files {
        ensure_running(cancel)?;
        let mut waits = pacing.sequential_backoff.iter();
        let sha = loop {
            match api.create_blob(&file.content).await {
                Ok(sha) => break sha,
                Err(e) if e.is_retryable() => match waits.next() {
                    Some(wait) => {
                        let wait = match &*e {
                            ErrorKind::SecondaryRateLimit => pacing.rate_limit_cooldown.max(*wait),
                            _ => *wait,
                        };
                        tracing::debug!(path = %file.path, wait_secs = wait.as_secs(), "Retrying blob upload");
                        pause(wait, cancel).await?;
                    },
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        };
        created.push(CreatedBlob { path: file.path.clone(), sha });
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::git_blob_hash;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stillpress_journal::{Journal, Level};

    #[derive(Debug, Clone, Copy)]
    enum Fail {
        Transport,
        Throttled,
        Rejected,
    }

    /// Fails according to a per-content script, then succeeds.
    #[derive(Default)]
    struct ScriptedApi {
        script: Mutex<HashMap<Vec<u8>, VecDeque<Fail>>>,
        calls: AtomicUsize,
    }
    impl ScriptedApi {
        fn failing(content: &str, failures: impl IntoIterator<Item = Fail>) -> Self {
            let api = Self::default();
            api.script.lock().unwrap().insert(content.as_bytes().to_vec(), failures.into_iter().collect());
            api
        }
    }

    #[async_trait]
    impl BlobApi for ScriptedApi {
        async fn create_blob(&self, content: &[u8]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().get_mut(content).and_then(VecDeque::pop_front);
            match next {
                None => Ok(git_blob_hash(content)),
                Some(Fail::Transport) => exn::bail!(ErrorKind::Transport("blobs".to_string())),
                Some(Fail::Throttled) => exn::bail!(ErrorKind::SecondaryRateLimit),
                Some(Fail::Rejected) => exn::bail!(ErrorKind::Api(422, "bad blob".to_string())),
            }
        }
    }

    fn blobs(contents: &[&str]) -> Vec<StagedBlob> {
        contents.iter().map(|c| StagedBlob { path: format!("{c}.html"), content: c.as_bytes().to_vec() }).collect()
    }

    async fn upload(api: &ScriptedApi, files: &[StagedBlob]) -> (Result<Vec<CreatedBlob>>, Journal) {
        let journal = Journal::in_memory(true);
        let mut pacing = Pacing::immediate(300);
        pacing.blob_concurrency = 2;
        let result = create_blobs(api, files, &pacing, &CancellationToken::new(), &journal).await;
        (result, journal)
    }

    fn paths(created: &[CreatedBlob]) -> Vec<&str> {
        let mut paths: Vec<&str> = created.iter().map(|b| b.path.as_str()).collect();
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn test_all_succeed_in_parallel() {
        let api = ScriptedApi::default();
        let files = blobs(&["a", "b", "c"]);
        let created = upload(&api, &files).await.0.unwrap();
        assert_eq!(paths(&created), vec!["a.html", "b.html", "c.html"]);
        assert_eq!(created[0].sha, git_blob_hash(b"a"));
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transport_failure_is_retried() {
        let api = ScriptedApi::failing("b", [Fail::Transport]);
        let created = upload(&api, &blobs(&["a", "b", "c"])).await.0.unwrap();
        assert_eq!(paths(&created), vec!["a.html", "b.html", "c.html"]);
        assert_eq!(api.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_secondary_rate_limit_switches_to_sequential() {
        let api = ScriptedApi::failing("a", [Fail::Throttled]);
        let (created, journal) = upload(&api, &blobs(&["a", "b", "c", "d"])).await;
        assert_eq!(paths(&created.unwrap()), vec!["a.html", "b.html", "c.html", "d.html"]);
        // a and b in the first chunk, then a, c and d one at a time.
        assert_eq!(api.calls.load(Ordering::SeqCst), 5);
        assert!(journal.entries().iter().any(|e| e.level == Level::Warning));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let api = ScriptedApi::failing("b", [Fail::Rejected]);
        let err = upload(&api, &blobs(&["a", "b"])).await.0.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Api(422, _)));
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_transport_failure_exhausts_both_ladders() {
        let api = ScriptedApi::failing("a", [Fail::Transport; 64]);
        let (result, journal) = upload(&api, &blobs(&["a"])).await;
        let err = result.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transport(_)));
        // One parallel attempt, then three rounds of one try plus three retries.
        assert_eq!(api.calls.load(Ordering::SeqCst), 1 + 3 * 4);
        assert_eq!(journal.error_count(), 1);
    }
}
