//! One run, from loading settings to the last published destination.
//!
//! The phases run in a fixed order: enumerate, crawl and transform pages
//! into the staging root, copy assets, apply includes and excludes, then
//! hand the staged tree to every enabled destination. Page, file and
//! destination failures are logged to the journal and the run carries on;
//! only configuration, locking and staging setup abort it.

use crate::error::{ErrorKind, Result};
use crate::lock::RunLock;
use crate::state::{StateFile, Status};
use exn::ResultExt;
use futures::StreamExt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stillpress_assets::{Collector, CopyPolicy, Layout};
use stillpress_cache::{Database, PageCache};
use stillpress_config::{Settings, Tuning};
use stillpress_crawl::{CrawlEvent, Crawler, Enumeration, Fetch, HttpFetcher, Strategy, crawl, enumerate};
use stillpress_journal::{Journal, LogSink};
use stillpress_publish::{PublishContext, PublishReport, Publisher, commit_message};
use stillpress_source::{ContentSource, SnapshotSource, SourceHandle};
use stillpress_stage::{IncludeRoots, Pattern, Staging, forced};
use stillpress_storage::BackendHandle;
use stillpress_storage::backend::{LocalBackend, ReadOnlyBackend};
use stillpress_transform::{BaseUrls, Transformer, UrlMode};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

pub const CACHE_FILE: &str = "cache.db";
const CANCEL_POLL: Duration = Duration::from_secs(2);

// Progress plan, in percent.
const PAGES_DONE: u64 = 80;
const ASSETS_DONE: u64 = 81;
const INCLUDES_DONE: u64 = 84;
const EXCLUDES_DONE: u64 = 87;
const OUTPUTS_START: u64 = 90;
const DONE: u64 = 100;

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: Status,
    pub errors: u64,
    pub warnings: u64,
    /// Pages written to the staging root.
    pub pages: u64,
    /// Destinations that published successfully.
    pub published: Vec<PublishReport>,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct Tally {
    pages: u64,
    published: Vec<PublishReport>,
}

/// Everything the phases of one run share.
struct Run<'a> {
    settings: &'a Settings,
    state_dir: &'a Path,
    journal: &'a Journal,
    cancel: &'a CancellationToken,
    started_at: OffsetDateTime,
}
impl Run<'_> {
    fn progress(&self, percent: u64, status: &str) {
        self.journal.update_progress(percent, DONE, status);
    }

    fn ensure_running(&self) -> Result<()> {
        match self.cancel.is_cancelled() {
            true => exn::bail!(ErrorKind::Cancelled),
            false => Ok(()),
        }
    }
}

/// Runs the pipeline.
///
/// Settings are read when [`run`](Self::run) is called, not when the engine
/// is built, so a long-lived engine always sees the current configuration.
/// The `with_*` methods replace the collaborators a run would otherwise build
/// from its settings.
#[derive(Default)]
pub struct Engine {
    config: Option<PathBuf>,
    settings: Option<Settings>,
    source: Option<SourceHandle>,
    fetcher: Option<Arc<dyn Fetch>>,
    publishers: Vec<Box<dyn Publisher>>,
}
impl Engine {
    /// `config` names an explicit settings file; `None` uses the default
    /// locations.
    pub fn new(config: Option<PathBuf>) -> Self {
        Self { config, ..Default::default() }
    }

    /// Use fixed settings instead of loading them.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_source(mut self, source: SourceHandle) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Publish to `publisher`'s destination through it rather than the
    /// publisher built from settings. The destination still has to be
    /// enabled.
    pub fn with_publisher(mut self, publisher: Box<dyn Publisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn settings(&self) -> Result<Settings> {
        match &self.settings {
            Some(settings) => Ok(settings.clone()),
            None => stillpress_config::load(self.config.as_deref()).or_raise(|| ErrorKind::Config),
        }
    }

    /// Execute one run.
    ///
    /// Fails without side effects when the settings are invalid or another
    /// run is active. Otherwise the run always reaches a final state, and
    /// the staging root is gone afterwards whatever happened in between.
    #[instrument(skip_all)]
    pub async fn run(&self) -> Result<RunOutcome> {
        let settings = self.settings()?;
        settings.validate().or_raise(|| ErrorKind::Config)?;
        let state_dir = settings.state_dir().or_raise(|| ErrorKind::Config)?;
        tokio::fs::create_dir_all(&state_dir).await.or_raise(|| ErrorKind::State(state_dir.clone()))?;

        let journal =
            Journal::open(&state_dir, settings.generate.debug).or_raise(|| ErrorKind::State(state_dir.clone()))?;
        let run_id = Uuid::new_v4().to_string();
        let started_at = OffsetDateTime::now_utc();
        let state = StateFile::new(&state_dir);
        begin(&state_dir, &state, &settings.tuning, &journal, &run_id, started_at)?;
        tracing::info!(run_id, state_dir = %state_dir.display(), "Run started");
        journal.info("Starting static site generation");

        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_for_cancel(state.clone(), run_id.clone(), cancel.clone()));
        let run = Run { settings: &settings, state_dir: &state_dir, journal: &journal, cancel: &cancel, started_at };
        let mut tally = Tally::default();
        let result = self.execute(&run, &mut tally).await;
        watcher.abort();

        let cancelled = cancel.is_cancelled();
        match result {
            Ok(()) => {},
            Err(e) if matches!(&*e, ErrorKind::Cancelled) => journal.warning("Run cancelled; remaining steps skipped"),
            Err(e) => journal.error(&format!("Run aborted: {}", e.deref())),
        }

        let errors = journal.error_count();
        let status = match errors {
            0 => Status::Completed,
            _ => Status::CompletedWithErrors,
        };
        match status {
            Status::Completed => journal.info("Static site generation completed"),
            _ => journal.info(&format!("Static site generation completed with {errors} error(s)")),
        }
        journal.flush();

        let finished = state.update(|s| match s.run_id.as_deref() == Some(run_id.as_str()) {
            true => s.finish(errors, OffsetDateTime::now_utc()).map(Some),
            false => Ok(None),
        });
        match finished {
            Ok(Some(_)) => {},
            Ok(None) => tracing::warn!(run_id, "Run state was reset while running; leaving it"),
            Err(e) => tracing::error!(error = %e.deref(), "Could not record the end of the run"),
        }
        tracing::info!(run_id, %status, errors, pages = tally.pages, "Run finished");

        Ok(RunOutcome {
            run_id,
            status,
            errors,
            warnings: journal.warning_count(),
            pages: tally.pages,
            published: tally.published,
            cancelled,
        })
    }

    /// The phases inside a staging root that is removed afterwards.
    async fn execute(&self, run: &Run<'_>, tally: &mut Tally) -> Result<()> {
        let staging = Staging::create(run.state_dir).await.or_raise(|| ErrorKind::Staging)?;
        let result = self.phases(run, &staging, tally).await;
        if let Err(e) = staging.cleanup().await {
            run.journal.error(&format!("Could not remove the staging directory: {}", e.deref()));
        }
        result
    }

    async fn phases(&self, run: &Run<'_>, staging: &Staging, tally: &mut Tally) -> Result<()> {
        let settings = run.settings;
        let source = self.source(settings).await?;
        let pages = enumerate(source.as_ref(), settings.archives).await.or_raise(|| ErrorKind::Enumerate)?;
        run.journal.info(&format!("Found {} URLs to process", pages.len()));

        let bases = BaseUrls::new([settings.site.home_url.as_str(), settings.site.site_url()]);
        let transformer = Transformer::new(bases, settings.generate.url_mode, settings.archive_toggles());
        tally.pages = self.crawl_pages(run, staging, &pages, &transformer).await?;
        run.ensure_running()?;

        if settings.generate.robots_txt
            && let Err(e) = staging.write_robots_txt().await
        {
            run.journal.error(&format!("Could not write robots.txt: {}", e.deref()));
        }

        let rewrite = (settings.generate.url_mode == UrlMode::Relative).then(|| transformer.bases());
        let layout = Layout {
            content_dir: settings.site.content_dir.clone(),
            includes_dir: settings.site.includes_dir.clone(),
        };
        let policy = CopyPolicy::new(&settings.assets.denied_extensions);
        match &settings.site.root {
            Some(root) => {
                copy_assets(run, staging, source.as_ref(), root, &layout, &policy, rewrite).await;
                run.progress(ASSETS_DONE, "Assets copied");
                run.ensure_running()?;
                include_paths(run, staging, root, &layout, &policy, rewrite).await;
            },
            None => run.journal.warning("No site root configured; assets and include paths skipped"),
        }
        run.progress(INCLUDES_DONE, "Include paths copied");
        exclude_patterns(run, staging, &layout).await;
        run.progress(EXCLUDES_DONE, "Exclusions applied");
        run.ensure_running()?;

        self.publish(run, staging, tally).await
    }

    async fn source(&self, settings: &Settings) -> Result<SourceHandle> {
        if let Some(source) = &self.source {
            return Ok(source.clone());
        }
        let Some(path) = &settings.site.source else {
            exn::bail!(ErrorKind::Missing("site.source"));
        };
        let source = SnapshotSource::load(path).await.or_raise(|| ErrorKind::Source)?;
        Ok(Arc::new(source))
    }

    /// Crawl every page, transform it and write it out. Returns the number
    /// of pages written.
    #[instrument(skip_all, fields(pages = pages.len()))]
    async fn crawl_pages(
        &self,
        run: &Run<'_>,
        staging: &Staging,
        pages: &Enumeration,
        transformer: &Transformer,
    ) -> Result<u64> {
        let generate = &run.settings.generate;
        let fetcher = match &self.fetcher {
            Some(fetcher) => fetcher.clone(),
            None => {
                let fetcher = HttpFetcher::new(generate.effective_timeout(), generate.basic_auth.clone())
                    .or_raise(|| ErrorKind::Crawler)?;
                Arc::new(fetcher)
            },
        };
        let database = match generate.cache_enabled {
            true => open_cache(run).await,
            false => None,
        };
        let strategy = match generate.parallel {
            true => Strategy::parallel(generate.concurrency, generate.batch_size),
            false => Strategy::Sequential,
        };
        let cache = database.as_ref().map(|db| PageCache::new(db.pool().clone()));
        let crawler = Crawler::new(fetcher, cache, strategy, run.cancel.clone());

        let mut written = 0;
        let events = crawl(&crawler, pages);
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                CrawlEvent::Started { total } => run.progress(0, &format!("Crawling {total} pages")),
                CrawlEvent::Page { url, body, cached } => {
                    let page = transformer.transform(&url, &body);
                    for warning in &page.warnings {
                        run.journal.warning(&format!("{url}: {warning}"));
                    }
                    match staging.write_page(&url, page.body.as_bytes()).await {
                        Ok(path) => {
                            written += 1;
                            let origin = if cached { "cache" } else { "network" };
                            run.journal.debug(&format!("Saved {url} to {path} (from {origin})"));
                        },
                        Err(e) => run.journal.error(&format!("Could not save {url}: {}", e.deref())),
                    }
                },
                CrawlEvent::Failed { url, reason } => run.journal.error(&format!("Failed to fetch {url}: {reason}")),
                CrawlEvent::CacheWarning { url, message } => run.journal.warning(&format!("{url}: {message}")),
                CrawlEvent::Progress { done, total } => {
                    run.progress(scale(done, total, 0, PAGES_DONE), &format!("Crawled {done} of {total} pages"));
                },
                CrawlEvent::Complete(summary) => run.journal.info(&format!(
                    "Crawl finished: {} fetched, {} from cache, {} failed",
                    summary.fetched, summary.cached, summary.failed
                )),
            }
        }
        if let Some(database) = database {
            database.close().await;
        }
        run.progress(PAGES_DONE, "Pages saved");
        Ok(written)
    }

    /// Hand the staged tree to each enabled destination in turn. A failing
    /// destination is logged and the next one still runs.
    #[instrument(skip_all)]
    async fn publish(&self, run: &Run<'_>, staging: &Staging, tally: &mut Tally) -> Result<()> {
        let settings = run.settings;
        let destinations = settings.publish.enabled();
        let message = commit_message(&settings.generate.commit_message, run.started_at);
        let ctx =
            PublishContext { message: &message, started_at: run.started_at, sink: run.journal, cancel: run.cancel };
        let count = destinations.len() as u64;

        for (i, destination) in destinations.into_iter().enumerate() {
            run.ensure_running()?;
            let percent = OUTPUTS_START + scale(i as u64, count, 0, DONE - OUTPUTS_START);
            run.progress(percent, &format!("Publishing to {destination}"));

            let built;
            let publisher: &dyn Publisher = match self.publishers.iter().find(|p| p.destination() == destination) {
                Some(publisher) => publisher.as_ref(),
                None => match stillpress_publish::build(destination, settings) {
                    Ok(publisher) => {
                        built = publisher;
                        built.as_ref()
                    },
                    Err(e) => {
                        run.journal.error(&format!("{destination}: {}", e.deref()));
                        continue;
                    },
                },
            };
            match publisher.publish(staging.backend(), &ctx).await {
                Ok(report) => {
                    run.journal.info(&format!(
                        "{destination}: published {} file(s), {} unchanged",
                        report.uploaded, report.skipped
                    ));
                    tally.published.push(report);
                },
                Err(e) => run.journal.error(&format!("{destination}: publish failed: {}", e.deref())),
            }
        }
        run.progress(DONE, "Done");
        Ok(())
    }
}

/// Under the lock: enter the running state and reset the journal.
fn begin(
    state_dir: &Path,
    state: &StateFile,
    tuning: &Tuning,
    journal: &Journal,
    run_id: &str,
    now: OffsetDateTime,
) -> Result<()> {
    let lock = RunLock::acquire(state_dir, Duration::from_secs(tuning.lock_timeout_secs))?;
    let ttl = Duration::from_secs(tuning.running_flag_ttl_secs);
    let started = state.update(|s| s.start(run_id, now, ttl));
    if started.is_ok() {
        journal.clear();
    }
    if let Err(e) = lock.release() {
        tracing::warn!(error = %e.deref(), "Could not release the run lock");
    }
    started
}

/// Trip `cancel` once the persisted state asks for it or no longer belongs
/// to this run.
async fn watch_for_cancel(state: StateFile, run_id: String, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(CANCEL_POLL);
    loop {
        interval.tick().await;
        match state.load() {
            Ok(current) if current.run_id.as_deref() != Some(run_id.as_str()) || !current.is_active() => {
                tracing::warn!(run_id, "Run state reset; cancelling");
                cancel.cancel();
                return;
            },
            Ok(current) if current.status == Status::CancelRequested => {
                tracing::info!(run_id, "Cancellation requested");
                cancel.cancel();
                return;
            },
            Ok(_) => {},
            Err(e) => tracing::debug!(error = %e.deref(), "Could not poll run state"),
        }
    }
}

/// A failing cache is a warning; the crawl then runs without one.
async fn open_cache(run: &Run<'_>) -> Option<Database> {
    let path = run.state_dir.join(CACHE_FILE);
    match Database::connect(&path).await {
        Ok(database) => Some(database),
        Err(e) => {
            run.journal.warning(&format!("Page cache unavailable, fetching everything: {}", e.deref()));
            None
        },
    }
}

#[instrument(skip_all, fields(root = %root.display()))]
async fn copy_assets(
    run: &Run<'_>,
    staging: &Staging,
    source: &dyn ContentSource,
    root: &Path,
    layout: &Layout,
    policy: &CopyPolicy,
    rewrite: Option<&BaseUrls>,
) {
    let site: BackendHandle = match LocalBackend::open("site", root) {
        Ok(backend) => Arc::new(ReadOnlyBackend::new(Arc::new(backend))),
        Err(e) => {
            run.journal.error(&format!("Site root is not readable: {}", e.deref()));
            return;
        },
    };
    let assets = &run.settings.assets;
    let collector = Collector::new(site.clone(), layout.clone(), policy.clone())
        .with_extra_dirs(assets.extra_content_dirs.iter().cloned())
        .with_root_icons(assets.root_icons.iter().cloned());
    let plan = match collector.collect(source, staging.backend()).await {
        Ok(plan) => plan,
        Err(e) => {
            run.journal.error(&format!("Could not collect assets: {}", e.deref()));
            return;
        },
    };
    for (group, files) in plan.summary() {
        run.journal.debug(&format!("{group}: {files} file(s) to copy"));
    }
    let report = staging.copy_assets(&plan, site.as_ref(), rewrite, run.journal).await;
    run.journal.info(&format!(
        "Copied {} asset(s), rewrote {}, {} failed",
        report.copied, report.converted, report.failed
    ));
}

#[instrument(skip_all)]
async fn include_paths(
    run: &Run<'_>,
    staging: &Staging,
    root: &Path,
    layout: &Layout,
    policy: &CopyPolicy,
    rewrite: Option<&BaseUrls>,
) {
    let paths: Vec<PathBuf> = run
        .settings
        .generate
        .include_paths
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| root.join(p))
        .collect();
    if paths.is_empty() {
        return;
    }
    let roots = match IncludeRoots::new(root, layout).await {
        Ok(roots) => roots,
        Err(e) => {
            run.journal.error(&format!("Include paths skipped: {}", e.deref()));
            return;
        },
    };
    let report = staging.include(&paths, &roots, policy, rewrite, run.journal).await;
    run.journal.info(&format!("Included {} file(s), {} path(s) rejected or failed", report.copied, report.failed));
}

#[instrument(skip_all)]
async fn exclude_patterns(run: &Run<'_>, staging: &Staging, layout: &Layout) {
    let mut patterns = forced(&layout.content_dir);
    for raw in &run.settings.generate.exclude_patterns {
        match Pattern::new(raw) {
            Some(pattern) => patterns.push(pattern),
            None if raw.trim().is_empty() => {},
            None => run.journal.warning(&format!("Ignoring exclude pattern `{raw}`")),
        }
    }
    match staging.exclude(&patterns, run.journal).await {
        Ok(report) if report.removed == 0 => {},
        Ok(report) => run.journal.info(&format!("Excluded {} file(s)", report.removed)),
        Err(e) => run.journal.error(&format!("Could not apply exclusions: {}", e.deref())),
    }
}

/// `done / total` mapped onto `start..end`.
fn scale(done: u64, total: u64, start: u64, end: u64) -> u64 {
    match total {
        0 => start,
        _ => start + (end - start) * done.min(total) / total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunState;
    use async_trait::async_trait;
    use rstest::rstest;
    use stillpress_config::{Destination, LocalTarget};
    use stillpress_crawl::FetchFailure;
    use stillpress_source::Snapshot;
    use stillpress_source::models::{SiteInfo, Theme};
    use stillpress_stage::STAGING_DIR;

    const HOME: &str = "https://example.com";

    struct StaticFetcher;
    #[async_trait]
    impl Fetch for StaticFetcher {
        async fn fetch(&self, url: &str) -> std::result::Result<String, FetchFailure> {
            match url {
                "https://example.com/" => Ok(format!("<html><body><a href=\"{HOME}/about/\">About</a></body></html>")),
                _ => Err(FetchFailure::Status(404)),
            }
        }
    }

    struct FailingPublisher;
    #[async_trait]
    impl Publisher for FailingPublisher {
        fn destination(&self) -> Destination {
            Destination::Archive
        }

        async fn publish(
            &self,
            tree: &LocalBackend,
            _ctx: &PublishContext<'_>,
        ) -> stillpress_publish::error::Result<PublishReport> {
            assert!(tree.root().join("index.html").is_file());
            exn::bail!(stillpress_publish::error::ErrorKind::Api(500, "boom".to_string()))
        }
    }

    fn source() -> SourceHandle {
        let snapshot = Snapshot {
            site: Some(SiteInfo {
                home_url: HOME.to_string(),
                site_url: None,
                posts_per_page: 10,
                published_posts: 0,
                theme: Theme { stylesheet: "t".to_string(), template: None },
                site_icon: None,
                custom_logo: None,
                header_image: None,
                background_image: None,
            }),
            ..Default::default()
        };
        Arc::new(SnapshotSource::new(snapshot).unwrap())
    }

    fn settings(state: &Path, output: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.site.home_url = HOME.to_string();
        settings.generate.cache_enabled = false;
        settings.archives.sitemap = false;
        settings.archives.rss = false;
        settings.state.dir = Some(state.to_path_buf());
        settings.publish.local = LocalTarget { enabled: true, path: Some(output.join("site")) };
        settings.publish.archive = LocalTarget { enabled: true, path: Some(output.join("archives")) };
        settings
    }

    fn engine(settings: Settings) -> Engine {
        Engine::default().with_settings(settings).with_source(source()).with_fetcher(Arc::new(StaticFetcher))
    }

    #[tokio::test]
    async fn test_failing_destination_still_cleans_up() {
        let state = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let outcome = engine(settings(state.path(), output.path()))
            .with_publisher(Box::new(FailingPublisher))
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.status, Status::CompletedWithErrors);
        assert_eq!(outcome.pages, 1);
        assert!(!outcome.cancelled);
        assert_eq!(outcome.published.len(), 1);
        assert_eq!(outcome.published[0].destination, Destination::Local);
        assert!(!state.path().join(STAGING_DIR).exists());
        assert!(output.path().join("site/index.html").is_file());

        let saved = StateFile::new(state.path()).load().unwrap();
        assert_eq!(saved.status, Status::CompletedWithErrors);
        assert_eq!(saved.errors, outcome.errors);
        let entries = Journal::read(state.path()).unwrap();
        assert!(entries.iter().any(|e| e.message.contains("archive: publish failed")));
        assert_eq!(Journal::read_progress(state.path()).unwrap().percentage, 100);
    }

    #[tokio::test]
    async fn test_clean_run_completes() {
        let state = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let mut settings = settings(state.path(), output.path());
        settings.publish.archive.enabled = false;
        let outcome = engine(settings).run().await.unwrap();

        assert_eq!(outcome.status, Status::Completed);
        assert_eq!(outcome.errors, 0);
        let page = std::fs::read_to_string(output.path().join("site/index.html")).unwrap();
        assert!(page.contains("href=\"/about/\""), "{page}");
    }

    #[tokio::test]
    async fn test_active_run_rejects_second_start() {
        let state = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let file = StateFile::new(state.path());
        let mut running = RunState::default();
        running.start("other", OffsetDateTime::now_utc(), Duration::from_secs(3600)).unwrap();
        file.save(&running).unwrap();

        let err = engine(settings(state.path(), output.path())).run().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyRunning));
        assert_eq!(file.load().unwrap(), running);
        assert!(!state.path().join(crate::lock::LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn test_invalid_settings_touch_nothing() {
        let state = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.state.dir = Some(state.path().join("state"));
        let err = engine(settings).run().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config));
        assert!(!state.path().join("state").exists());
    }

    #[rstest]
    #[case(0, 10, 0)]
    #[case(5, 10, 40)]
    #[case(10, 10, 80)]
    #[case(12, 10, 80)]
    #[case(3, 0, 0)]
    fn test_scale(#[case] done: u64, #[case] total: u64, #[case] expected: u64) {
        assert_eq!(scale(done, total, 0, PAGES_DONE), expected);
    }
}
