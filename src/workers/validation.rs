//! Validation worker loop.
//!
//! Re-checks stored job URLs and marks definitively dead ones
//! inactive. The decision is fail-open: only an HTTP 404/410 or a
//! closed-listing phrase in a 2xx body counts as dead. Anything
//! ambiguous, network errors included, leaves the record alone.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{WorkerContext, WorkerCounters, DRAIN_POLL, IDLE_POLL};
use crate::error::Result;
use crate::fetch::ProbeResult;
use crate::models::{ScrapeTask, TaskKind};

const CLAIM_KINDS: &[TaskKind] = &[TaskKind::Validate];

/// Body phrases that mark a 2xx page as a dead listing.
const CLOSED_PHRASES: &[&str] = &[
    "job closed",
    "no longer accepting applications",
    "listing has expired",
];

/// What a probe outcome says about a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Definitive dead-link evidence; mark inactive.
    Dead,
    /// Anything else, including errors.
    Alive,
}

/// Pure decision over a probe outcome.
pub fn judge(outcome: &Result<ProbeResult>) -> Verdict {
    match outcome {
        Ok(probe) if probe.status == 404 || probe.status == 410 => Verdict::Dead,
        Ok(probe) if (200..300).contains(&probe.status) => {
            let body = probe.body.to_lowercase();
            if CLOSED_PHRASES.iter().any(|p| body.contains(p)) {
                Verdict::Dead
            } else {
                Verdict::Alive
            }
        }
        // 5xx, 403, redirect loops, timeouts: all ambiguous.
        _ => Verdict::Alive,
    }
}

pub async fn run(
    ctx: Arc<WorkerContext>,
    worker_id: usize,
    run_until_idle: bool,
    counters: Arc<WorkerCounters>,
) {
    debug!("validation worker {} started", worker_id);
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
                error!("validation worker {}: claim failed: {}", worker_id, e);
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            }
        };

        match validate(&ctx, &task).await {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = ctx.queue.complete(&task.id) {
                    error!("failed to complete task {}: {}", task.id, e);
                }
            }
            Err(e) => {
                warn!("validate task {} failed: {}", task.id, e);
                if let Err(qe) = ctx.queue.fail(&task, &e.to_string()) {
                    error!("failed to record failure for {}: {}", task.id, qe);
                } else {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
    debug!("validation worker {} stopped", worker_id);
}

/// Probe the record's URL and apply the verdict. The probe itself
/// cannot fail the task; only store errors do.
async fn validate(ctx: &WorkerContext, task: &ScrapeTask) -> Result<()> {
    let Some(url) = task.payload.target_url.as_deref() else {
        warn!("validate task {} has no target url, dropping", task.id);
        return Ok(());
    };

    let outcome = ctx.fetcher.probe(url).await;
    match judge(&outcome) {
        Verdict::Dead => {
            info!("marking dead listing inactive: {}", url);
            ctx.store.mark_inactive(url).await?;
        }
        Verdict::Alive => debug!("{} still valid", url),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScrapeError;

    fn probe(status: u16, body: &str) -> Result<ProbeResult> {
        Ok(ProbeResult {
            status,
            body: body.to_string(),
        })
    }

    #[test]
    fn not_found_is_dead() {
        assert_eq!(judge(&probe(404, "")), Verdict::Dead);
        assert_eq!(judge(&probe(410, "")), Verdict::Dead);
    }

    #[test]
    fn closed_phrases_in_live_pages_are_dead() {
        assert_eq!(
            judge(&probe(200, "Sorry, this Job Closed last week")),
            Verdict::Dead
        );
        assert_eq!(
            judge(&probe(200, "We are no longer accepting applications.")),
            Verdict::Dead
        );
        assert_eq!(judge(&probe(200, "Apply now!")), Verdict::Alive);
    }

    #[test]
    fn ambiguity_fails_open() {
        assert_eq!(judge(&probe(500, "")), Verdict::Alive);
        assert_eq!(judge(&probe(403, "blocked")), Verdict::Alive);
        let err: Result<ProbeResult> = Err(ScrapeError::fetch("x", "timeout"));
        assert_eq!(judge(&err), Verdict::Alive);
    }
}
