//! Worker loops that drain the task queue.
//!
//! Three pools share one queue: scraping workers (which also handle
//! dispatch fan-outs), validation workers, and a single cleanup
//! worker. Each worker is a spawned loop that claims, runs, and
//! reports; a loop that finds nothing either parks (daemon mode) or,
//! in run-until-idle mode for one-shot CLI commands, sleeps through
//! any pending retry backoff and exits only once its kinds are fully
//! drained.

pub mod cleanup;
pub mod scraping;
pub mod validation;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::browser::BrowserSessionPool;
use crate::config::Settings;
use crate::fetch::HttpFetcher;
use crate::models::TaskKind;
use crate::queue::TaskQueue;
use crate::sources::SourceRegistry;
use crate::store::JobStore;

/// Idle poll interval for daemon-mode workers.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Grace poll before a run-until-idle worker decides the queue is drained.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Everything a worker loop needs, shared across all pools.
pub struct WorkerContext {
    pub settings: Settings,
    pub queue: Arc<TaskQueue>,
    pub store: Arc<dyn JobStore>,
    pub registry: Arc<SourceRegistry>,
    pub fetcher: Arc<HttpFetcher>,
    pub browser: Option<Arc<BrowserSessionPool>>,
    /// Last dispatch fan-out instant, for the min-interval limiter.
    pub dispatch_gate: Mutex<Option<tokio::time::Instant>>,
}

impl WorkerContext {
    /// Space dispatch fan-outs at least `dispatch_min_interval` apart
    /// so several triggers firing together cannot stampede the queue.
    pub async fn dispatch_throttle(&self) {
        let min_interval = self.settings.dispatch_min_interval();
        let mut gate = self.dispatch_gate.lock().await;
        if let Some(last) = *gate {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                tokio::time::sleep(min_interval - elapsed).await;
            }
        }
        *gate = Some(tokio::time::Instant::now());
    }
}

/// After an empty claim in run-until-idle mode, sleep through the
/// earliest pending backoff of these kinds. Returns `true` when a
/// parked retry is worth claiming again; `false` means the queue is
/// genuinely drained for this pool.
pub(crate) async fn wait_for_backoff(ctx: &WorkerContext, kinds: &[TaskKind]) -> bool {
    match ctx.queue.next_eligible_at(kinds) {
        Ok(Some(at)) => {
            let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait + DRAIN_POLL).await;
            true
        }
        Ok(None) => false,
        Err(e) => {
            error!("backoff lookup failed: {}", e);
            false
        }
    }
}

/// Counters shared by all loops of one pool.
#[derive(Default)]
pub struct WorkerCounters {
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
}

/// Final task counts from a `run_all` invocation.
#[derive(Debug, Clone, Copy)]
pub struct WorkerTotals {
    pub scrape_completed: usize,
    pub scrape_failed: usize,
    pub validate_completed: usize,
    pub validate_failed: usize,
    pub cleanup_completed: usize,
    pub cleanup_failed: usize,
}

/// Start every worker pool and wait for them to finish.
///
/// With `run_until_idle` the call returns once the queue drains;
/// otherwise the loops run until the process is stopped.
pub async fn run_all(ctx: Arc<WorkerContext>, run_until_idle: bool) -> WorkerTotals {
    let scrape_counters = Arc::new(WorkerCounters::default());
    let validate_counters = Arc::new(WorkerCounters::default());
    let cleanup_counters = Arc::new(WorkerCounters::default());

    let mut handles = Vec::new();
    for worker_id in 0..ctx.settings.scrape_workers {
        let ctx = ctx.clone();
        let counters = scrape_counters.clone();
        handles.push(tokio::spawn(async move {
            scraping::run(ctx, worker_id, run_until_idle, counters).await;
        }));
    }
    for worker_id in 0..ctx.settings.validation_workers {
        let ctx = ctx.clone();
        let counters = validate_counters.clone();
        handles.push(tokio::spawn(async move {
            validation::run(ctx, worker_id, run_until_idle, counters).await;
        }));
    }
    {
        let ctx = ctx.clone();
        let counters = cleanup_counters.clone();
        handles.push(tokio::spawn(async move {
            cleanup::run(ctx, run_until_idle, counters).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    let totals = WorkerTotals {
        scrape_completed: scrape_counters.completed.load(Ordering::Relaxed),
        scrape_failed: scrape_counters.failed.load(Ordering::Relaxed),
        validate_completed: validate_counters.completed.load(Ordering::Relaxed),
        validate_failed: validate_counters.failed.load(Ordering::Relaxed),
        cleanup_completed: cleanup_counters.completed.load(Ordering::Relaxed),
        cleanup_failed: cleanup_counters.failed.load(Ordering::Relaxed),
    };
    info!(
        scrape = totals.scrape_completed,
        validate = totals.validate_completed,
        cleanup = totals.cleanup_completed,
        failed = totals.scrape_failed + totals.validate_failed + totals.cleanup_failed,
        "worker pools finished"
    );
    totals
}
