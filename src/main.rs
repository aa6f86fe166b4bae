//! Command-line front end: trigger a run, poll it, stop it, and look after
//! the page cache.

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use exn::ResultExt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use stillpress_cache::{Database, PageCache};
use stillpress_config::Settings;
use stillpress_engine::{CACHE_FILE, Engine, RunLock, RunState, StateFile, Status};
use stillpress_journal::{Journal, Level};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Display, Error)]
enum CliError {
    #[display("could not load settings")]
    Settings,
    #[display("the run did not start")]
    Run,
    #[display("could not read or update the run state")]
    State,
    #[display("page cache operation failed")]
    Cache,
}

type Result<T> = std::result::Result<T, exn::Exn<CliError>>;

#[derive(Parser)]
#[command(name = "stillpress", version)]
#[command(about = "Crawl a live site into a static snapshot and publish it")]
struct Cli {
    /// Settings file; defaults to ./stillpress.toml, then the user config
    /// directory.
    #[arg(long, short, global = true, env = "STILLPRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Raise diagnostic logging to debug (-v) or trace (-vv).
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the snapshot and publish it to every enabled destination.
    Run,
    /// Show the state and progress of the current or last run.
    Status {
        /// Print machine-readable JSON.
        #[arg(long)]
        json: bool,
        /// Number of recent log entries to show.
        #[arg(long, short = 'n', default_value_t = 10)]
        lines: usize,
    },
    /// Ask the active run to stop at its next checkpoint.
    Cancel {
        /// Reset the run state and remove the run lock immediately.
        #[arg(long)]
        force: bool,
    },
    /// Print the run log.
    Logs {
        /// Only show errors and warnings.
        #[arg(long)]
        problems: bool,
        /// Only show the last N entries.
        #[arg(long, short = 'n')]
        lines: Option<usize>,
    },
    /// Inspect or clear the page cache.
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Verify credentials for every enabled remote destination.
    Check,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show entry count and stored size.
    Stats,
    /// Remove every cached page.
    Clear,
    /// Remove one URL, or every page cached for a content item.
    Forget {
        #[arg(required_unless_present = "entity")]
        url: Option<String>,
        #[arg(long, conflicts_with = "url")]
        entity: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Run => run(cli.config).await,
        Command::Status { json, lines } => status(cli.config.as_deref(), json, lines),
        Command::Cancel { force } => cancel(cli.config.as_deref(), force),
        Command::Logs { problems, lines } => logs(cli.config.as_deref(), problems, lines),
        Command::Cache(command) => cache(cli.config.as_deref(), command).await,
        Command::Check => check(cli.config.as_deref()).await,
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn settings(config: Option<&Path>) -> Result<Settings> {
    stillpress_config::load(config).or_raise(|| CliError::Settings)
}

fn state_dir(config: Option<&Path>) -> Result<PathBuf> {
    settings(config)?.state_dir().or_raise(|| CliError::Settings)
}

async fn run(config: Option<PathBuf>) -> Result<ExitCode> {
    let state = StateFile::new(&state_dir(config.as_deref())?);
    let interrupt = tokio::spawn(cancel_on_interrupt(state));
    let outcome = Engine::new(config).run().await;
    interrupt.abort();
    let outcome = outcome.or_raise(|| CliError::Run)?;

    for report in &outcome.published {
        println!("{}: {} uploaded, {} unchanged", report.destination, report.uploaded, report.skipped);
    }
    println!(
        "{} pages, {} error(s), {} warning(s){}: {}",
        outcome.pages,
        outcome.errors,
        outcome.warnings,
        if outcome.cancelled { ", cancelled" } else { "" },
        outcome.status
    );
    Ok(match outcome.status {
        Status::Completed => ExitCode::SUCCESS,
        _ => ExitCode::from(2),
    })
}

/// Turn Ctrl-C into a cancel request; the run stops at its next checkpoint
/// and still cleans up.
async fn cancel_on_interrupt(state: StateFile) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    eprintln!("Interrupted; stopping after the current step");
    if let Err(e) = state.update(RunState::request_cancel) {
        tracing::warn!(error = %e.deref(), "Could not request cancellation");
    }
}

fn status(config: Option<&Path>, json: bool, lines: usize) -> Result<ExitCode> {
    let dir = state_dir(config)?;
    let state = StateFile::new(&dir).load().or_raise(|| CliError::State)?;
    let progress = Journal::read_progress(&dir).or_raise(|| CliError::State)?;
    let entries = Journal::read(&dir).or_raise(|| CliError::State)?;
    let recent = &entries[entries.len().saturating_sub(lines)..];

    if json {
        let value = serde_json::json!({ "state": state, "progress": progress, "log": recent });
        println!("{value:#}");
        return Ok(ExitCode::SUCCESS);
    }
    println!("Status:   {}", state.status);
    if let Some(run_id) = &state.run_id {
        println!("Run:      {run_id}");
    }
    if let Some(started) = state.started_at {
        println!("Started:  {started}");
    }
    if let Some(finished) = state.finished_at {
        println!("Finished: {finished} ({} error(s))", state.errors);
    }
    if state.is_active() {
        println!("Progress: {}% {}", progress.percentage, progress.status);
    }
    if !recent.is_empty() {
        println!();
        for entry in recent {
            println!("{entry}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cancel(config: Option<&Path>, force: bool) -> Result<ExitCode> {
    let dir = state_dir(config)?;
    let state = StateFile::new(&dir);
    if force {
        state
            .update(|s| {
                s.cancel();
                Ok(())
            })
            .or_raise(|| CliError::State)?;
        let had_lock = RunLock::force_clear(&dir).or_raise(|| CliError::State)?;
        println!("Run state reset{}", if had_lock { " and lock removed" } else { "" });
        return Ok(ExitCode::SUCCESS);
    }
    match state.update(RunState::request_cancel) {
        Ok(()) => {
            println!("Cancellation requested; the run stops at its next checkpoint");
            Ok(ExitCode::SUCCESS)
        },
        Err(e) if matches!(&*e, stillpress_engine::error::ErrorKind::NotRunning) => {
            println!("No run is in progress");
            Ok(ExitCode::from(2))
        },
        Err(e) => Err(e).or_raise(|| CliError::State),
    }
}

fn logs(config: Option<&Path>, problems: bool, lines: Option<usize>) -> Result<ExitCode> {
    let dir = state_dir(config)?;
    let entries: Vec<_> = Journal::read(&dir)
        .or_raise(|| CliError::State)?
        .into_iter()
        .filter(|e| !problems || e.level <= Level::Warning)
        .collect();
    let skip = lines.map_or(0, |n| entries.len().saturating_sub(n));
    for entry in &entries[skip..] {
        println!("{} {entry}", entry.at);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cache(config: Option<&Path>, command: CacheCommand) -> Result<ExitCode> {
    let dir = state_dir(config)?;
    tokio::fs::create_dir_all(&dir).await.or_raise(|| CliError::Cache)?;
    let database = Database::connect(dir.join(CACHE_FILE)).await.or_raise(|| CliError::Cache)?;
    let cache = PageCache::new(database.pool().clone());
    let result = match command {
        CacheCommand::Stats => cache.stats().await.map(|stats| {
            println!("{} page(s), {:.2} MB", stats.entries, stats.total_bytes as f64 / 1024.0 / 1024.0);
        }),
        CacheCommand::Clear => cache.clear_all().await.map(|removed| println!("Removed {removed} cached page(s)")),
        CacheCommand::Forget { url: Some(url), .. } => cache.delete(&url).await.map(|removed| match removed {
            true => println!("Removed {url}"),
            false => println!("{url} was not cached"),
        }),
        CacheCommand::Forget { entity: Some(id), .. } => {
            cache.delete_by_entity(id).await.map(|removed| println!("Removed {removed} page(s) for item {id}"))
        },
        CacheCommand::Forget { .. } => Ok(()),
    };
    database.close().await;
    result.or_raise(|| CliError::Cache)?;
    Ok(ExitCode::SUCCESS)
}

async fn check(config: Option<&Path>) -> Result<ExitCode> {
    let settings = settings(config)?;
    let mut failed = false;
    for destination in settings.publish.enabled() {
        let checked = match stillpress_publish::build(destination, &settings) {
            Ok(publisher) => publisher.check().await,
            Err(e) => Err(e),
        };
        match checked {
            Ok(Some(identity)) => println!("{destination}: ok ({identity})"),
            Ok(None) => println!("{destination}: nothing to check"),
            Err(e) => {
                failed = true;
                println!("{destination}: {}", e.deref());
            },
        }
    }
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}
