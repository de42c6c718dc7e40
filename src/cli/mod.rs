//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing::info;

use crate::browser::{BrowserPoolConfig, BrowserSessionPool};
use crate::config::Settings;
use crate::extract::AiFallbackExtractor;
use crate::fetch::HttpFetcher;
use crate::models::{ScrapeTask, TaskKind, TaskPayload};
use crate::orchestrator::{self, idempotency_key};
use crate::queue::TaskQueue;
use crate::scheduler;
use crate::sources::{build_registry, SourceDeps};
use crate::store::SqliteJobStore;
use crate::workers::{self, WorkerContext};

#[derive(Parser)]
#[command(name = "jobhound")]
#[command(about = "Job posting ingestion and maintenance pipeline")]
#[command(version)]
pub struct Cli {
    /// Config file path (default: jobhound.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon: cron scheduler plus all worker pools
    Run,

    /// Trigger a scrape of every source and drain the queue
    ScrapeNow,

    /// Scrape one source (optionally restricted to specific URLs)
    Scrape {
        /// Source ID to scrape
        source_id: String,
        /// URLs to scrape (universal sources only)
        urls: Vec<String>,
    },

    /// Run the store maintenance batch once
    Cleanup,

    /// Show queue and store status
    Status,

    /// List configured sources
    Sources,
}

/// Shared components wired from settings.
struct App {
    settings: Settings,
    ctx: Arc<WorkerContext>,
}

fn build_app(settings: Settings) -> anyhow::Result<App> {
    let queue = Arc::new(TaskQueue::new(
        &settings.database_path,
        settings.task_timeout_secs,
    )?);
    let store = Arc::new(SqliteJobStore::new(&settings.database_path)?);
    let fetcher = Arc::new(HttpFetcher::new(
        settings.fetch_timeout(),
        &settings.user_agent,
    )?);
    let browser = Arc::new(BrowserSessionPool::new(BrowserPoolConfig {
        timeout_secs: settings.fetch_timeout_secs,
        ..Default::default()
    }));
    let ai = settings
        .ai
        .as_ref()
        .map(|ai| Arc::new(AiFallbackExtractor::from_settings(ai)));

    let deps = SourceDeps {
        fetcher: fetcher.clone(),
        browser: Some(browser.clone()),
        ai,
    };
    let registry = Arc::new(build_registry(&settings, &deps).map_err(anyhow::Error::from)?);

    let ctx = Arc::new(WorkerContext {
        settings: settings.clone(),
        queue,
        store,
        registry,
        fetcher,
        browser: Some(browser),
        dispatch_gate: Mutex::new(None),
    });
    Ok(App { settings, ctx })
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let app = build_app(settings)?;

    match cli.command {
        Commands::Run => run_daemon(app).await,
        Commands::ScrapeNow => scrape_now(app).await,
        Commands::Scrape { source_id, urls } => scrape_one(app, source_id, urls).await,
        Commands::Cleanup => cleanup_once(app).await,
        Commands::Status => status(app).await,
        Commands::Sources => sources(app),
    }
}

async fn run_daemon(app: App) -> anyhow::Result<()> {
    let mut sched = scheduler::start(&app.settings, app.ctx.queue.clone()).await?;
    info!("jobhound daemon running, press Ctrl-C to stop");

    let ctx = app.ctx.clone();
    tokio::select! {
        _ = workers::run_all(ctx, false) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    sched.shutdown().await.ok();
    if let Some(browser) = &app.ctx.browser {
        browser.shutdown().await;
    }
    Ok(())
}

async fn scrape_now(app: App) -> anyhow::Result<()> {
    orchestrator::dispatch_scrape_all(&app.ctx.queue, &app.ctx.registry, &app.settings)?;
    let totals = workers::run_all(app.ctx.clone(), true).await;
    if let Some(browser) = &app.ctx.browser {
        browser.shutdown().await;
    }
    println!(
        "scraped: {} tasks completed, {} exhausted",
        totals.scrape_completed, totals.scrape_failed
    );
    Ok(())
}

async fn scrape_one(app: App, source_id: String, urls: Vec<String>) -> anyhow::Result<()> {
    // Fail fast on a bad source id before enqueueing anything.
    app.ctx.registry.get(&source_id)?;

    let payload = TaskPayload {
        urls,
        ..Default::default()
    };
    let window = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    let task = ScrapeTask::new(
        TaskKind::Scrape,
        Some(source_id.clone()),
        payload,
        1,
        app.settings.max_attempts,
        idempotency_key("scrape-cli", &source_id, &window),
    );
    app.ctx.queue.enqueue(&task)?;

    let totals = workers::run_all(app.ctx.clone(), true).await;
    if let Some(browser) = &app.ctx.browser {
        browser.shutdown().await;
    }
    println!(
        "{}: {} tasks completed, {} exhausted",
        source_id, totals.scrape_completed, totals.scrape_failed
    );
    Ok(())
}

async fn cleanup_once(app: App) -> anyhow::Result<()> {
    let report = workers::cleanup::run_batch(&app.ctx).await?;
    println!(
        "cleanup: {} deactivated, {} deleted, {} sampled, {} marked inactive",
        report.deactivated, report.deleted, report.verified_sample, report.marked_inactive
    );
    Ok(())
}

async fn status(app: App) -> anyhow::Result<()> {
    let counts = app.ctx.queue.counts()?;
    println!("queue:");
    println!("  queued:           {}", counts.queued);
    println!("  active:           {}", counts.active);
    println!("  retrying:         {}", counts.retrying);
    println!("  completed:        {}", counts.completed);
    println!("  failed-exhausted: {}", counts.failed_exhausted);

    let stale_after_days = app.ctx.settings.stale_after_days.max(0) as u32;
    let stats = app.ctx.store.cleanup_stats(stale_after_days).await?;
    println!("store:");
    println!("  total jobs:   {}", stats.total_jobs);
    println!("  active jobs:  {}", stats.active_jobs);
    println!("  expired jobs: {}", stats.expired_jobs);
    println!("  stale jobs:   {}", stats.stale_jobs);

    let triggers = app.ctx.queue.list_repeatable()?;
    if !triggers.is_empty() {
        println!("repeatable triggers:");
        for t in triggers {
            println!("  {:<14} {:<18} {}", t.name, t.kind.as_str(), t.cron);
        }
    }
    Ok(())
}

fn sources(app: App) -> anyhow::Result<()> {
    for source in &app.settings.sources {
        let detail = source
            .endpoint
            .as_deref()
            .unwrap_or("(urls from task payload)");
        println!("{:<18} {:<10} {}", source.id, format!("{:?}", source.kind).to_lowercase(), detail);
        for category in &source.categories {
            println!("{:<18} {:<10}   - {}", "", "", category);
        }
    }
    Ok(())
}
