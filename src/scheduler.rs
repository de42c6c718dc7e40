//! Cron scheduling of the repeatable pipeline triggers.
//!
//! Cron jobs never do work; they enqueue `dispatch-*` or `cleanup`
//! tasks for the workers to pick up. Trigger registrations are cleared
//! and rewritten at startup so a schedule removed from config cannot
//! keep firing from a previous run's state.

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::Settings;
use crate::models::{ScrapeTask, TaskKind, TaskPayload};
use crate::orchestrator::idempotency_key;
use crate::queue::TaskQueue;

/// Enqueue the trigger task a cron firing produces.
fn enqueue_trigger(queue: &TaskQueue, kind: TaskKind, max_attempts: u32) {
    let window = chrono::Utc::now().format("%Y-%m-%dT%H:%M").to_string();
    let task = ScrapeTask::new(
        kind,
        None,
        TaskPayload::default(),
        1, // triggers go to the head of the queue
        max_attempts,
        idempotency_key(kind.as_str(), "trigger", &window),
    );
    match queue.enqueue(&task) {
        Ok(true) => info!("enqueued {} trigger", kind.as_str()),
        Ok(false) => info!("{} trigger already live, skipped", kind.as_str()),
        Err(e) => error!("failed to enqueue {} trigger: {}", kind.as_str(), e),
    }
}

fn cron_job(
    cron: &str,
    queue: Arc<TaskQueue>,
    kind: TaskKind,
    max_attempts: u32,
) -> Result<Job> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let queue = queue.clone();
        Box::pin(async move {
            enqueue_trigger(&queue, kind, max_attempts);
        })
    })?;
    Ok(job)
}

/// Register repeatable triggers and start the cron scheduler.
///
/// On a cold start with an empty queue, a scrape trigger is enqueued
/// immediately instead of waiting for the first cron firing.
pub async fn start(settings: &Settings, queue: Arc<TaskQueue>) -> Result<JobScheduler> {
    queue.clear_repeatable()?;
    queue.register_repeatable("scrape-all", TaskKind::DispatchScrape, &settings.scrape_cron)?;
    queue.register_repeatable(
        "validate-all",
        TaskKind::DispatchValidate,
        &settings.validate_cron,
    )?;
    queue.register_repeatable("cleanup", TaskKind::Cleanup, &settings.cleanup_cron)?;

    let scheduler = JobScheduler::new().await?;
    scheduler
        .add(cron_job(
            &settings.scrape_cron,
            queue.clone(),
            TaskKind::DispatchScrape,
            settings.max_attempts,
        )?)
        .await?;
    scheduler
        .add(cron_job(
            &settings.validate_cron,
            queue.clone(),
            TaskKind::DispatchValidate,
            settings.max_attempts,
        )?)
        .await?;
    scheduler
        .add(cron_job(
            &settings.cleanup_cron,
            queue.clone(),
            TaskKind::Cleanup,
            settings.max_attempts,
        )?)
        .await?;
    scheduler.start().await?;

    info!(
        scrape = %settings.scrape_cron,
        validate = %settings.validate_cron,
        cleanup = %settings.cleanup_cron,
        "scheduler started"
    );

    if queue.pending_count()? == 0 {
        info!("queue is empty on startup, triggering an immediate scrape");
        enqueue_trigger(&queue, TaskKind::DispatchScrape, settings.max_attempts);
    }

    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn startup_reregisters_triggers_and_seeds_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(TaskQueue::new(&dir.path().join("q.db"), 300).unwrap());
        // A trigger left over from an old config.
        queue
            .register_repeatable("legacy", TaskKind::Cleanup, "0 0 1 * * *")
            .unwrap();

        let settings = Settings::default();
        let mut scheduler = start(&settings, queue.clone()).await.unwrap();

        let triggers = queue.list_repeatable().unwrap();
        assert_eq!(triggers.len(), 3);
        assert!(triggers.iter().all(|t| t.name != "legacy"));

        // Cold start enqueued the immediate scrape trigger.
        assert_eq!(queue.pending_count().unwrap(), 1);

        scheduler.shutdown().await.ok();
    }
}
