//! Scraping worker loop.
//!
//! Handles `scrape` tasks plus the two dispatch fan-outs. Fan-outs are
//! cheap queue writes, so sharing the pool with scrapes keeps them
//! from needing their own workers while the throttle in
//! [`WorkerContext::dispatch_throttle`] stops trigger bursts.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, error, info, warn};

use super::{WorkerContext, WorkerCounters, DRAIN_POLL, IDLE_POLL};
use crate::error::{Result, ScrapeError};
use crate::models::{ScrapeTask, TaskKind, TaskStatus};
use crate::orchestrator;

const CLAIM_KINDS: &[TaskKind] = &[
    TaskKind::Scrape,
    TaskKind::DispatchScrape,
    TaskKind::DispatchValidate,
];

pub async fn run(
    ctx: Arc<WorkerContext>,
    worker_id: usize,
    run_until_idle: bool,
    counters: Arc<WorkerCounters>,
) {
    debug!("scraping worker {} started", worker_id);
    loop {
        let task = match ctx.queue.claim(CLAIM_KINDS) {
            Ok(Some(task)) => task,
            Ok(None) => {
                if run_until_idle {
                    // One grace poll, then sleep out any retry backoff
                    // so a failing task still runs to exhaustion.
                    tokio::time::sleep(DRAIN_POLL).await;
                    match ctx.queue.claim(CLAIM_KINDS) {
                        Ok(Some(task)) => task,
                        _ => {
                            if super::wait_for_backoff(&ctx, CLAIM_KINDS).await {
                                continue;
                            }
                            break;
                        }
                    }
                } else {
                    tokio::time::sleep(IDLE_POLL).await;
                    continue;
                }
            }
            Err(e) => {
                error!("scraping worker {}: claim failed: {}", worker_id, e);
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            }
        };

        match handle(&ctx, &task).await {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = ctx.queue.complete(&task.id) {
                    error!("failed to complete task {}: {}", task.id, e);
                }
                maybe_rotate(&ctx, &task).await;
            }
            Err(e) => {
                warn!(
                    "task {} ({}) attempt {} failed: {}",
                    task.id,
                    task.kind.as_str(),
                    task.attempts,
                    e
                );
                match ctx.queue.fail(&task, &e.to_string()) {
                    Ok(TaskStatus::Retrying) => {
                        // A fresh identity before the retry, in case the
                        // failure was a block on the current one.
                        rotate(&ctx).await;
                    }
                    Ok(TaskStatus::FailedExhausted) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        error!(
                            "task {} exhausted after {} attempts: {}",
                            task.id, task.attempts, e
                        );
                    }
                    Ok(_) => {}
                    Err(qe) => error!("failed to record failure for {}: {}", task.id, qe),
                }
            }
        }
    }
    debug!("scraping worker {} stopped", worker_id);
}

async fn handle(ctx: &WorkerContext, task: &ScrapeTask) -> Result<()> {
    match task.kind {
        TaskKind::Scrape => {
            let source_id = task
                .source_id
                .as_deref()
                .ok_or_else(|| ScrapeError::UnknownSource("<missing source id>".to_string()))?;
            let source = ctx.registry.get(source_id)?;
            let stats = source.scrape_and_save(ctx.store.as_ref(), &task.payload).await?;
            info!(
                source = source_id,
                saved = stats.saved,
                updated = stats.updated,
                "scrape task done"
            );
            Ok(())
        }
        TaskKind::DispatchScrape => {
            ctx.dispatch_throttle().await;
            orchestrator::dispatch_scrape_all(&ctx.queue, &ctx.registry, &ctx.settings)?;
            Ok(())
        }
        TaskKind::DispatchValidate => {
            ctx.dispatch_throttle().await;
            orchestrator::dispatch_validate_all(&ctx.queue, ctx.store.as_ref(), &ctx.settings)
                .await?;
            Ok(())
        }
        other => Err(ScrapeError::ExtractionInvalid(format!(
            "scraping worker claimed unexpected task kind {}",
            other.as_str()
        ))),
    }
}

/// Rotate the browser fingerprint after a fraction of successful
/// scrape tasks, so the presented identity drifts over time.
async fn maybe_rotate(ctx: &WorkerContext, task: &ScrapeTask) {
    if task.kind != TaskKind::Scrape {
        return;
    }
    let roll: f64 = rand::thread_rng().gen();
    if roll < ctx.settings.rotation_probability {
        rotate(ctx).await;
    }
}

async fn rotate(ctx: &WorkerContext) {
    if let Some(browser) = &ctx.browser {
        if let Err(e) = browser.rotate_context().await {
            warn!("context rotation failed: {}", e);
        }
    }
}
