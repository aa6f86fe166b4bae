//! Cache-aware crawl strategies.

use crate::enumerate::Enumeration;
use crate::fetch::{Fetch, FetchFailure};
use async_stream::stream;
use futures::{Stream, StreamExt};
use stillpress_cache::{PageCache, SourceRef};
use std::ops::Deref;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const MAX_CONCURRENCY: usize = 10;
/// Sequential progress is reported this many times over a crawl.
const PROGRESS_STEPS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One request at a time.
    Sequential,
    /// Fixed-size batches; requests inside a batch run concurrently and the
    /// whole batch completes before the next starts.
    Parallel { concurrency: usize, batch_size: usize },
}
impl Strategy {
    /// Parallel strategy with concurrency clamped to `1..=10`.
    pub fn parallel(concurrency: usize, batch_size: usize) -> Self {
        Self::Parallel { concurrency: concurrency.clamp(1, MAX_CONCURRENCY), batch_size: batch_size.max(1) }
    }
}

/// Progress events emitted by [`crawl`].
///
/// `Started` comes first and `Complete` last. Every page produces exactly
/// one `Page` or `Failed`, possibly preceded by `CacheWarning`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlEvent {
    Started { total: u64 },
    Page { url: String, body: String, cached: bool },
    Failed { url: String, reason: FetchFailure },
    /// The cache could not be read or written; the crawl carries on.
    CacheWarning { url: String, message: String },
    Progress { done: u64, total: u64 },
    Complete(CrawlSummary),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub fetched: u64,
    pub cached: u64,
    pub failed: u64,
    /// Stopped early on request; pages after the stop point were not visited.
    pub cancelled: bool,
}
impl CrawlSummary {
    fn count(&mut self, event: &CrawlEvent) {
        match event {
            CrawlEvent::Page { cached: true, .. } => self.cached += 1,
            CrawlEvent::Page { cached: false, .. } => self.fetched += 1,
            CrawlEvent::Failed { .. } => self.failed += 1,
            _ => {},
        }
    }
}

pub struct Crawler {
    fetcher: Arc<dyn Fetch>,
    cache: Option<PageCache>,
    strategy: Strategy,
    cancel: CancellationToken,
}
impl Crawler {
    /// Without a cache every page is fetched live and nothing is stored.
    pub fn new(fetcher: Arc<dyn Fetch>, cache: Option<PageCache>, strategy: Strategy, cancel: CancellationToken) -> Self {
        Self { fetcher, cache, strategy, cancel }
    }

    /// One page: cache first, then the network. Cache failures become
    /// warnings and fall through to a live fetch.
    async fn visit(&self, url: &str, source: Option<&SourceRef>) -> Vec<CrawlEvent> {
        let mut events = Vec::new();
        if let Some(cache) = &self.cache {
            match lookup(cache, url, source).await {
                Ok(Some(body)) => {
                    events.push(CrawlEvent::Page { url: url.to_string(), body, cached: true });
                    return events;
                },
                Ok(None) => {},
                Err(message) => events.push(CrawlEvent::CacheWarning { url: url.to_string(), message }),
            }
        }
        match self.fetcher.fetch(url).await {
            Ok(body) => {
                if let Some(cache) = &self.cache
                    && let Err(e) = cache.set(url, body.as_bytes(), source).await
                {
                    let message = format!("cache write failed: {}", e.deref());
                    events.push(CrawlEvent::CacheWarning { url: url.to_string(), message });
                }
                events.push(CrawlEvent::Page { url: url.to_string(), body, cached: false });
            },
            Err(reason) => {
                tracing::debug!(url, %reason, "Skipping page");
                events.push(CrawlEvent::Failed { url: url.to_string(), reason });
            },
        }
        events
    }
}

async fn lookup(cache: &PageCache, url: &str, source: Option<&SourceRef>) -> Result<Option<String>, String> {
    let valid = cache.is_valid(url, source).await.map_err(|e| format!("cache read failed: {}", e.deref()))?;
    if !valid {
        return Ok(None);
    }
    match cache.get(url).await.map_err(|e| format!("cache read failed: {}", e.deref()))? {
        Some(body) => String::from_utf8(body).map(Some).map_err(|_| "cached body is not UTF-8".to_string()),
        None => Ok(None),
    }
}

/// Stream the pages of an enumeration using the crawler's strategy.
///
/// Cancellation is honoured between pages (sequential) or between batches
/// (parallel); a cancelled crawl still ends with `Complete`.
pub fn crawl<'a>(crawler: &'a Crawler, pages: &'a Enumeration) -> impl Stream<Item = CrawlEvent> + 'a {
    stream!({
        let urls: Vec<&str> = pages.urls().collect();
        let total = urls.len() as u64;
        let mut summary = CrawlSummary::default();
        yield CrawlEvent::Started { total };

        match crawler.strategy {
            Strategy::Sequential => {
                let interval = (urls.len() / PROGRESS_STEPS).max(1);
                for (i, url) in urls.iter().enumerate() {
                    if crawler.cancel.is_cancelled() {
                        summary.cancelled = true;
                        break;
                    }
                    if i % interval == 0 || i + 1 == urls.len() {
                        yield CrawlEvent::Progress { done: i as u64 + 1, total };
                    }
                    for event in crawler.visit(url, pages.source_of(url)).await {
                        summary.count(&event);
                        yield event;
                    }
                }
            },
            Strategy::Parallel { concurrency, batch_size } => {
                let mut done = 0u64;
                for batch in urls.chunks(batch_size) {
                    if crawler.cancel.is_cancelled() {
                        summary.cancelled = true;
                        break;
                    }
                    done += batch.len() as u64;
                    yield CrawlEvent::Progress { done, total };
                    let mut visits = futures::stream::iter(batch.iter().map(|url| crawler.visit(url, pages.source_of(url))))
                        .buffer_unordered(concurrency);
                    while let Some(events) = visits.next().await {
                        for event in events {
                            summary.count(&event);
                            yield event;
                        }
                    }
                }
            },
        }

        tracing::info!(
            fetched = summary.fetched,
            cached = summary.cached,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Crawl finished"
        );
        yield CrawlEvent::Complete(summary);
    })
}
