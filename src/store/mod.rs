//! Persistence layer for job records.
//!
//! The canonical store is SQLite; an in-memory implementation backs
//! unit tests for workers and sources.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::JobRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of writing a record keyed by its source URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First time this URL was seen.
    Inserted,
    /// Known URL, content changed.
    Updated,
    /// Known URL, nothing changed; only last_seen_at was refreshed.
    Skipped,
}

/// A job record as held in the store, with lifecycle metadata.
#[derive(Debug, Clone)]
pub struct StoredJob {
    pub id: String,
    pub record: JobRecord,
    pub active: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Aggregate counts reported before and after cleanup runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupStats {
    pub total_jobs: u64,
    pub active_jobs: u64,
    pub expired_jobs: u64,
    pub stale_jobs: u64,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or refresh a record, deduplicating on source URL. A
    /// re-seen record is reactivated regardless of prior state.
    async fn upsert(&self, record: &JobRecord) -> Result<UpsertOutcome>;

    /// Random sample of active jobs, for spot verification.
    async fn find_active_sample(&self, n: u32) -> Result<Vec<StoredJob>>;

    /// Active jobs, oldest last-seen first.
    async fn get_active(&self, limit: u32) -> Result<Vec<StoredJob>>;

    /// Deactivate jobs whose expiry date has passed. Returns the count.
    async fn deactivate_expired(&self) -> Result<u64>;

    /// Delete jobs not seen for the given number of days. Returns the count.
    async fn delete_stale(&self, days: u32) -> Result<u64>;

    /// Mark the job with this source URL inactive.
    async fn mark_inactive(&self, source_url: &str) -> Result<bool>;

    /// Aggregate counts. `stale_after_days` is the same threshold
    /// handed to [`delete_stale`](Self::delete_stale), so the reported
    /// stale count agrees with what a deletion pass would remove.
    async fn cleanup_stats(&self, stale_after_days: u32) -> Result<CleanupStats>;
}

/// Convert a single-row query result into an Option.
pub(crate) fn to_option<T>(
    result: std::result::Result<T, rusqlite::Error>,
) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

pub(crate) fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
