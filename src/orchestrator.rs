//! Fan-out of trigger tasks into per-source and per-record work.
//!
//! Dispatch handlers run inside workers when a `dispatch-*` task is
//! claimed. Idempotency keys are time-windowed digests, so a trigger
//! that fires twice in one window enqueues each unit of work once.

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::Result;
use crate::models::{ScrapeTask, TaskKind, TaskPayload};
use crate::queue::TaskQueue;
use crate::sources::SourceRegistry;
use crate::store::JobStore;

/// Cap on records validated per dispatch, oldest last-seen first.
const VALIDATE_BATCH_LIMIT: u32 = 1000;

/// Hex digest of the operation scoped to a time window.
pub fn idempotency_key(operation: &str, subject: &str, window: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update(b":");
    hasher.update(subject.as_bytes());
    hasher.update(b":");
    hasher.update(window.as_bytes());
    hex::encode(hasher.finalize())
}

fn hourly_window() -> String {
    Utc::now().format("%Y-%m-%dT%H").to_string()
}

fn daily_window() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Enqueue one `Scrape` task per registered source. Returns how many
/// were newly enqueued (deduped ones are not counted).
pub fn dispatch_scrape_all(
    queue: &TaskQueue,
    registry: &SourceRegistry,
    settings: &Settings,
) -> Result<usize> {
    let window = hourly_window();
    let mut enqueued = 0;
    for source_id in registry.ids() {
        let task = ScrapeTask::new(
            TaskKind::Scrape,
            Some(source_id.clone()),
            TaskPayload::default(),
            2,
            settings.max_attempts,
            idempotency_key("scrape", &source_id, &window),
        );
        if queue.enqueue(&task)? {
            enqueued += 1;
        } else {
            debug!("scrape task for {} already live this window", source_id);
        }
    }
    info!("dispatched {} scrape tasks", enqueued);
    Ok(enqueued)
}

/// Enqueue one `Validate` task per active stored record.
pub async fn dispatch_validate_all(
    queue: &TaskQueue,
    store: &dyn JobStore,
    settings: &Settings,
) -> Result<usize> {
    let window = daily_window();
    let records = store.get_active(VALIDATE_BATCH_LIMIT).await?;
    let mut enqueued = 0;
    for job in records {
        let payload = TaskPayload {
            target_url: Some(job.record.source_url.clone()),
            record_id: Some(job.id.clone()),
            ..Default::default()
        };
        let task = ScrapeTask::new(
            TaskKind::Validate,
            None,
            payload,
            3,
            settings.max_attempts,
            idempotency_key("validate", &job.record.source_url, &window),
        );
        if queue.enqueue(&task)? {
            enqueued += 1;
        }
    }
    info!("dispatched {} validate tasks", enqueued);
    Ok(enqueued)
}

/// Enqueue the daily cleanup batch.
pub fn enqueue_cleanup(queue: &TaskQueue, settings: &Settings) -> Result<bool> {
    let task = ScrapeTask::new(
        TaskKind::Cleanup,
        None,
        TaskPayload::default(),
        3,
        settings.max_attempts,
        idempotency_key("cleanup", "all", &daily_window()),
    );
    Ok(queue.enqueue(&task)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::HttpFetcher;
    use crate::models::JobRecord;
    use crate::sources::{build_registry, SourceDeps};
    use crate::store::MemoryJobStore;
    use std::sync::Arc;

    fn registry() -> SourceRegistry {
        let deps = SourceDeps {
            fetcher: Arc::new(
                HttpFetcher::new(std::time::Duration::from_secs(5), "test-agent").unwrap(),
            ),
            browser: None,
            ai: None,
        };
        build_registry(&Settings::default(), &deps).unwrap()
    }

    #[test]
    fn scrape_dispatch_covers_every_source_once() {
        let dir = tempfile::tempdir().unwrap();
        let queue = TaskQueue::new(&dir.path().join("q.db"), 300).unwrap();
        let settings = Settings::default();
        let registry = registry();

        let first = dispatch_scrape_all(&queue, &registry, &settings).unwrap();
        assert_eq!(first, registry.len());

        // Second dispatch in the same window is fully deduped.
        let second = dispatch_scrape_all(&queue, &registry, &settings).unwrap();
        assert_eq!(second, 0);
        assert_eq!(queue.pending_count().unwrap(), registry.len() as u64);
    }

    #[tokio::test]
    async fn validate_dispatch_targets_active_records() {
        let dir = tempfile::tempdir().unwrap();
        let queue = TaskQueue::new(&dir.path().join("q.db"), 300).unwrap();
        let settings = Settings::default();
        let store = MemoryJobStore::new();
        for i in 0..3 {
            store
                .upsert(&JobRecord::new(
                    format!("Job {i}"),
                    "Acme",
                    "d",
                    format!("https://example.com/{i}"),
                ))
                .await
                .unwrap();
        }
        store.mark_inactive("https://example.com/0").await.unwrap();

        let enqueued = dispatch_validate_all(&queue, &store, &settings).await.unwrap();
        assert_eq!(enqueued, 2);
    }
}
