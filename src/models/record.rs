//! Canonical job record and run reporting types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detected kind of fetched content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Rss,
    Json,
    Html,
}

/// A normalized job posting. `source_url` is the dedup key: the store
/// upserts on it and never duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub company_name: String,
    pub description: String,
    pub location: Option<String>,
    pub remote: bool,
    pub job_type: Option<String>,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub skills_required: Vec<String>,
    pub source_url: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Minimal record with required fields; optional fields default empty.
    pub fn new(
        title: impl Into<String>,
        company_name: impl Into<String>,
        description: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            company_name: company_name.into(),
            description: description.into(),
            location: None,
            remote: false,
            job_type: None,
            salary_min: None,
            salary_max: None,
            skills_required: Vec::new(),
            source_url: source_url.into(),
            posted_at: None,
            expires_at: None,
        }
    }
}

/// Per-run counters produced once by `scrape_and_save`, never mutated after.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeRunStats {
    pub source_id: String,
    pub saved: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScrapeRunStats {
    pub fn total(&self) -> usize {
        self.saved + self.updated + self.skipped + self.errors
    }
}

/// Summary of one cleanup run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// Records flipped inactive because their expiry timestamp passed.
    pub deactivated: usize,
    /// Records hard-deleted for exceeding the staleness threshold.
    pub deleted: usize,
    /// Size of the random reachability sample that was checked.
    pub verified_sample: usize,
    /// Sampled records marked inactive after a definite dead-link result.
    pub marked_inactive: usize,
}
