//! Cleanup worker loop.
//!
//! One worker runs the maintenance batch sequentially: deactivate
//! expired records, delete stale ones, then spot-check a small random
//! sample of active records for dead links. Store stats are logged
//! before and after so a run's effect is visible in one log scan.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{WorkerContext, WorkerCounters, DRAIN_POLL, IDLE_POLL};
use crate::error::Result;
use crate::models::{CleanupReport, TaskKind};

const CLAIM_KINDS: &[TaskKind] = &[TaskKind::Cleanup];

pub async fn run(ctx: Arc<WorkerContext>, run_until_idle: bool, counters: Arc<WorkerCounters>) {
    debug!("cleanup worker started");
    loop {
        let task = match ctx.queue.claim(CLAIM_KINDS) {
            Ok(Some(task)) => task,
            Ok(None) => {
                if run_until_idle {
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
                error!("cleanup worker: claim failed: {}", e);
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            }
        };

        match run_batch(&ctx).await {
            Ok(report) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = ctx.queue.complete(&task.id) {
                    error!("failed to complete task {}: {}", task.id, e);
                }
                info!(
                    deactivated = report.deactivated,
                    deleted = report.deleted,
                    verified = report.verified_sample,
                    marked_inactive = report.marked_inactive,
                    "cleanup batch done"
                );
            }
            Err(e) => {
                warn!("cleanup batch failed: {}", e);
                if let Err(qe) = ctx.queue.fail(&task, &e.to_string()) {
                    error!("failed to record failure for {}: {}", task.id, qe);
                } else {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
    debug!("cleanup worker stopped");
}

/// The maintenance batch itself, also reachable from the CLI.
pub async fn run_batch(ctx: &WorkerContext) -> Result<CleanupReport> {
    let stale_after_days = ctx.settings.stale_after_days.max(0) as u32;
    let before = ctx.store.cleanup_stats(stale_after_days).await?;
    info!(
        total = before.total_jobs,
        active = before.active_jobs,
        expired = before.expired_jobs,
        stale = before.stale_jobs,
        "store before cleanup"
    );

    let mut report = CleanupReport::default();
    report.deactivated = ctx.store.deactivate_expired().await? as usize;
    report.deleted = ctx.store.delete_stale(stale_after_days).await? as usize;

    // Spot-check: unlike validation, the sample pass is strict. Any
    // unreachable or non-2xx sampled record goes inactive.
    let sample = ctx
        .store
        .find_active_sample(ctx.settings.verify_sample_size as u32)
        .await?;
    report.verified_sample = sample.len();
    for job in &sample {
        let reachable = match ctx.fetcher.head_status(&job.record.source_url).await {
            Ok(status) if (200..300).contains(&status) => {
                debug!("{} answered {}", job.record.source_url, status);
                true
            }
            Ok(status) => {
                info!("sampled record answered {}: {}", status, job.record.source_url);
                false
            }
            Err(e) => {
                info!("sampled record unreachable ({}): {}", e, job.record.source_url);
                false
            }
        };
        if !reachable && ctx.store.mark_inactive(&job.record.source_url).await? {
            report.marked_inactive += 1;
        }
    }

    let after = ctx.store.cleanup_stats(stale_after_days).await?;
    info!(
        total = after.total_jobs,
        active = after.active_jobs,
        expired = after.expired_jobs,
        stale = after.stale_jobs,
        "store after cleanup"
    );
    Ok(report)
}
