//! Queue task model and retry backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a queued task does when a worker picks it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Scrape one source (optionally a single URL within it).
    Scrape,
    /// Fan a scrape-all trigger out into one `Scrape` task per source.
    DispatchScrape,
    /// Re-check one stored record's URL.
    Validate,
    /// Fan a validate-all trigger out into `Validate` tasks.
    DispatchValidate,
    /// Run the daily store maintenance batch.
    Cleanup,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Scrape => "scrape",
            TaskKind::DispatchScrape => "dispatch-scrape",
            TaskKind::Validate => "validate",
            TaskKind::DispatchValidate => "dispatch-validate",
            TaskKind::Cleanup => "cleanup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scrape" => Some(TaskKind::Scrape),
            "dispatch-scrape" => Some(TaskKind::DispatchScrape),
            "validate" => Some(TaskKind::Validate),
            "dispatch-validate" => Some(TaskKind::DispatchValidate),
            "cleanup" => Some(TaskKind::Cleanup),
            _ => None,
        }
    }
}

/// Task lifecycle: `Queued → Active → {Completed | Retrying → Active | FailedExhausted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Active,
    Completed,
    Retrying,
    FailedExhausted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::Retrying => "retrying",
            TaskStatus::FailedExhausted => "failed-exhausted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(TaskStatus::Queued),
            "active" => Some(TaskStatus::Active),
            "completed" => Some(TaskStatus::Completed),
            "retrying" => Some(TaskStatus::Retrying),
            "failed-exhausted" => Some(TaskStatus::FailedExhausted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::FailedExhausted)
    }
}

/// Free-form task arguments, serialized as JSON in the queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Explicit URL list for a `Scrape` task (universal source runs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// URL a `Validate` task should re-check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    /// Stored-record id a `Validate` task operates on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

/// A unit of work held by the queue with priority/retry metadata.
///
/// Delivery is at-least-once; handlers must be idempotent in their side
/// effects (re-running an upsert or mark-inactive is safe).
#[derive(Debug, Clone)]
pub struct ScrapeTask {
    pub id: String,
    pub kind: TaskKind,
    pub source_id: Option<String>,
    pub payload: TaskPayload,
    /// 1 = high .. 3 = low; claims are strictly low-number-first.
    pub priority: u8,
    /// Delivery attempts so far. Only increases.
    pub attempts: u32,
    pub max_attempts: u32,
    pub idempotency_key: String,
    pub status: TaskStatus,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScrapeTask {
    pub fn new(
        kind: TaskKind,
        source_id: Option<String>,
        payload: TaskPayload,
        priority: u8,
        max_attempts: u32,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            source_id,
            payload,
            priority,
            attempts: 0,
            max_attempts,
            idempotency_key: idempotency_key.into(),
            status: TaskStatus::Queued,
            last_error: None,
            next_retry_at: None,
            claimed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Exponential backoff: 1s, 2s, 4s, ... for attempt 1, 2, 3, ...
pub fn backoff_delay(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(6);
    Duration::from_secs(1 << exp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn kind_round_trips() {
        for kind in [
            TaskKind::Scrape,
            TaskKind::DispatchScrape,
            TaskKind::Validate,
            TaskKind::DispatchValidate,
            TaskKind::Cleanup,
        ] {
            assert_eq!(TaskKind::parse(kind.as_str()), Some(kind));
        }
    }
}
