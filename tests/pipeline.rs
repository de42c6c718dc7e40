//! End-to-end pipeline tests over the queue, workers, and store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use jobhound::config::{Settings, SourceConfig};
use jobhound::fetch::HttpFetcher;
use jobhound::models::{JobRecord, ScrapeTask, TaskKind, TaskPayload};
use jobhound::orchestrator;
use jobhound::queue::TaskQueue;
use jobhound::sources::{build_registry, SourceDeps, SourceKind};
use jobhound::store::{JobStore, MemoryJobStore};
use jobhound::workers::{self, WorkerContext};

/// Settings with a single no-network source and small worker pools.
fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.scrape_workers = 2;
    settings.validation_workers = 2;
    settings.verify_sample_size = 0;
    settings.politeness_delay_ms = 0;
    settings.sources = vec![SourceConfig {
        id: "universal".into(),
        kind: SourceKind::Universal,
        endpoint: None,
        categories: Vec::new(),
        urls: Vec::new(),
        fallback_url: None,
    }];
    settings
}

fn test_context(
    settings: Settings,
    dir: &tempfile::TempDir,
    store: Arc<MemoryJobStore>,
) -> Arc<WorkerContext> {
    let queue = Arc::new(TaskQueue::new(&dir.path().join("queue.db"), settings.task_timeout_secs).unwrap());
    let fetcher = Arc::new(
        HttpFetcher::new(std::time::Duration::from_secs(2), "jobhound-test").unwrap(),
    );
    let deps = SourceDeps {
        fetcher: fetcher.clone(),
        browser: None,
        ai: None,
    };
    let registry = Arc::new(build_registry(&settings, &deps).unwrap());
    Arc::new(WorkerContext {
        settings,
        queue,
        store,
        registry,
        fetcher,
        browser: None,
        dispatch_gate: Mutex::new(None),
    })
}

#[tokio::test]
async fn dispatch_trigger_fans_out_and_drains() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let ctx = test_context(test_settings(), &dir, store);

    // A dispatch-scrape trigger fans out into one scrape per source.
    let task = ScrapeTask::new(
        TaskKind::DispatchScrape,
        None,
        TaskPayload::default(),
        1,
        3,
        "trigger-1",
    );
    assert!(ctx.queue.enqueue(&task).unwrap());

    let totals = workers::run_all(ctx.clone(), true).await;
    // The trigger and the fanned-out scrape both completed.
    assert_eq!(totals.scrape_completed, 2);
    assert_eq!(totals.scrape_failed, 0);
    assert_eq!(ctx.queue.pending_count().unwrap(), 0);
}

#[tokio::test]
async fn validation_fails_open_on_unreachable_urls() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    // Port 9 (discard) is closed; probes hit connection refused.
    for i in 0..3 {
        store
            .upsert(&JobRecord::new(
                format!("Job {i}"),
                "Acme",
                "desc",
                format!("http://127.0.0.1:9/jobs/{i}"),
            ))
            .await
            .unwrap();
    }
    let ctx = test_context(test_settings(), &dir, store.clone());

    let enqueued = orchestrator::dispatch_validate_all(&ctx.queue, ctx.store.as_ref(), &ctx.settings)
        .await
        .unwrap();
    assert_eq!(enqueued, 3);

    let totals = workers::run_all(ctx.clone(), true).await;
    assert_eq!(totals.validate_completed, 3);

    // Network errors never deactivate records.
    let stats = store.cleanup_stats(365).await.unwrap();
    assert_eq!(stats.active_jobs, 3);
}

#[tokio::test]
async fn cleanup_deactivates_expired_and_deletes_stale() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());

    // Ten records: two already expired, one not seen for over a year.
    for i in 0..10 {
        let mut record = JobRecord::new(
            format!("Job {i}"),
            "Acme",
            "desc",
            format!("https://example.com/jobs/{i}"),
        );
        if i < 2 {
            record.expires_at = Some(Utc::now() - Duration::days(3));
        }
        store.upsert(&record).await.unwrap();
    }
    store.age_job("https://example.com/jobs/9", 400);

    let ctx = test_context(test_settings(), &dir, store.clone());
    orchestrator::enqueue_cleanup(&ctx.queue, &ctx.settings).unwrap();

    let totals = workers::run_all(ctx.clone(), true).await;
    assert_eq!(totals.cleanup_completed, 1);

    let stats = store.cleanup_stats(365).await.unwrap();
    assert_eq!(stats.total_jobs, 9);
    assert_eq!(stats.active_jobs, 7);
}

#[tokio::test]
async fn cleanup_sample_marks_unreachable_records_inactive() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    // Port 9 (discard) is closed, so the reachability check fails.
    store
        .upsert(&JobRecord::new(
            "Gone Job",
            "Acme",
            "desc",
            "http://127.0.0.1:9/job",
        ))
        .await
        .unwrap();

    let mut settings = test_settings();
    settings.verify_sample_size = 5;
    let ctx = test_context(settings, &dir, store.clone());
    orchestrator::enqueue_cleanup(&ctx.queue, &ctx.settings).unwrap();

    let totals = workers::run_all(ctx.clone(), true).await;
    assert_eq!(totals.cleanup_completed, 1);

    // The sample pass is strict: an unreachable record goes inactive.
    let stats = store.cleanup_stats(365).await.unwrap();
    assert_eq!(stats.active_jobs, 0);
    assert_eq!(stats.total_jobs, 1);
}

#[tokio::test]
async fn unknown_source_task_exhausts_without_retries_left() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let ctx = test_context(test_settings(), &dir, store);

    let task = ScrapeTask::new(
        TaskKind::Scrape,
        Some("nonexistent".into()),
        TaskPayload::default(),
        2,
        1, // single attempt so the failure is terminal immediately
        "bad-source",
    );
    assert!(ctx.queue.enqueue(&task).unwrap());

    let totals = workers::run_all(ctx.clone(), true).await;
    assert_eq!(totals.scrape_failed, 1);

    let counts = ctx.queue.counts().unwrap();
    assert_eq!(counts.failed_exhausted, 1);
    assert_eq!(counts.retrying, 0);
}

#[tokio::test]
async fn one_shot_run_retries_through_backoff_until_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let ctx = test_context(test_settings(), &dir, store);

    // Every attempt fails, and retries sit behind a backoff longer
    // than the drain poll. A one-shot run must still burn through all
    // three attempts instead of leaving the task parked as retrying.
    let task = ScrapeTask::new(
        TaskKind::Scrape,
        Some("nonexistent".into()),
        TaskPayload::default(),
        2,
        3,
        "bad-source-retries",
    );
    assert!(ctx.queue.enqueue(&task).unwrap());

    let totals = workers::run_all(ctx.clone(), true).await;
    assert_eq!(totals.scrape_failed, 1);

    let counts = ctx.queue.counts().unwrap();
    assert_eq!(counts.retrying, 0);
    assert_eq!(counts.failed_exhausted, 1);
    assert_eq!(ctx.queue.pending_count().unwrap(), 0);
}
