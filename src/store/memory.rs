//! In-memory job store for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::{CleanupStats, JobStore, Result, StoredJob, UpsertOutcome};
use crate::models::JobRecord;

/// HashMap-backed store keyed by source URL. Sampling is not random
/// here; tests want determinism.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, StoredJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Test hook: shift a job's last_seen_at into the past.
    pub fn age_job(&self, source_url: &str, days: i64) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(source_url) {
            job.last_seen_at = Utc::now() - Duration::days(days);
        }
    }

    pub fn get(&self, source_url: &str) -> Option<StoredJob> {
        self.jobs.lock().unwrap().get(source_url).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert(&self, record: &JobRecord) -> Result<UpsertOutcome> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        match jobs.get_mut(&record.source_url) {
            None => {
                jobs.insert(
                    record.source_url.clone(),
                    StoredJob {
                        id: uuid::Uuid::new_v4().to_string(),
                        record: record.clone(),
                        active: true,
                        first_seen_at: now,
                        last_seen_at: now,
                    },
                );
                Ok(UpsertOutcome::Inserted)
            }
            Some(existing) if existing.record == *record => {
                existing.last_seen_at = now;
                existing.active = true;
                Ok(UpsertOutcome::Skipped)
            }
            Some(existing) => {
                existing.record = record.clone();
                existing.last_seen_at = now;
                existing.active = true;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    async fn find_active_sample(&self, n: u32) -> Result<Vec<StoredJob>> {
        let jobs = self.jobs.lock().unwrap();
        let mut sample: Vec<StoredJob> = jobs.values().filter(|j| j.active).cloned().collect();
        sample.sort_by(|a, b| a.record.source_url.cmp(&b.record.source_url));
        sample.truncate(n as usize);
        Ok(sample)
    }

    async fn get_active(&self, limit: u32) -> Result<Vec<StoredJob>> {
        let jobs = self.jobs.lock().unwrap();
        let mut active: Vec<StoredJob> = jobs.values().filter(|j| j.active).cloned().collect();
        active.sort_by_key(|j| j.last_seen_at);
        active.truncate(limit as usize);
        Ok(active)
    }

    async fn deactivate_expired(&self) -> Result<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        let mut count = 0;
        for job in jobs.values_mut() {
            if job.active && job.record.expires_at.map(|e| e < now).unwrap_or(false) {
                job.active = false;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_stale(&self, days: u32) -> Result<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let cutoff = Utc::now() - Duration::days(days as i64);
        let before = jobs.len();
        jobs.retain(|_, job| job.last_seen_at >= cutoff);
        Ok((before - jobs.len()) as u64)
    }

    async fn mark_inactive(&self, source_url: &str) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(source_url) {
            Some(job) => {
                job.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn cleanup_stats(&self, stale_after_days: u32) -> Result<CleanupStats> {
        let jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        let stale_cutoff = now - Duration::days(stale_after_days as i64);
        Ok(CleanupStats {
            total_jobs: jobs.len() as u64,
            active_jobs: jobs.values().filter(|j| j.active).count() as u64,
            expired_jobs: jobs
                .values()
                .filter(|j| j.record.expires_at.map(|e| e < now).unwrap_or(false))
                .count() as u64,
            stale_jobs: jobs.values().filter(|j| j.last_seen_at < stale_cutoff).count() as u64,
        })
    }
}
