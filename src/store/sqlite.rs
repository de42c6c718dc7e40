//! SQLite-backed job store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rusqlite::{params, Connection, Row};
use tracing::debug;

use super::{
    parse_datetime, parse_datetime_opt, to_option, CleanupStats, JobStore, Result, StoredJob,
    UpsertOutcome,
};
use crate::models::JobRecord;

pub struct SqliteJobStore {
    db_path: PathBuf,
}

impl SqliteJobStore {
    pub fn new(db_path: &Path) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                company_name TEXT NOT NULL,
                description TEXT NOT NULL,
                location TEXT,
                remote INTEGER NOT NULL DEFAULT 0,
                job_type TEXT,
                salary_min INTEGER,
                salary_max INTEGER,
                skills_required TEXT NOT NULL DEFAULT '[]',
                source_url TEXT NOT NULL UNIQUE,
                posted_at TEXT,
                expires_at TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_active ON jobs(active);
            CREATE INDEX IF NOT EXISTS idx_jobs_last_seen ON jobs(last_seen_at);
        "#,
        )?;
        Ok(())
    }
}

fn row_to_stored_job(row: &Row<'_>) -> rusqlite::Result<StoredJob> {
    let skills: String = row.get("skills_required")?;
    Ok(StoredJob {
        id: row.get("id")?,
        record: JobRecord {
            title: row.get("title")?,
            company_name: row.get("company_name")?,
            description: row.get("description")?,
            location: row.get("location")?,
            remote: row.get::<_, i64>("remote")? != 0,
            job_type: row.get("job_type")?,
            salary_min: row.get("salary_min")?,
            salary_max: row.get("salary_max")?,
            skills_required: serde_json::from_str(&skills).unwrap_or_default(),
            source_url: row.get("source_url")?,
            posted_at: parse_datetime_opt(row.get("posted_at")?),
            expires_at: parse_datetime_opt(row.get("expires_at")?),
        },
        active: row.get::<_, i64>("active")? != 0,
        first_seen_at: parse_datetime(&row.get::<_, String>("first_seen_at")?),
        last_seen_at: parse_datetime(&row.get::<_, String>("last_seen_at")?),
    })
}

/// Content comparison for upsert. Lifecycle fields are excluded so a
/// re-scrape of an unchanged posting counts as Skipped.
fn content_matches(existing: &JobRecord, incoming: &JobRecord) -> bool {
    existing.title == incoming.title
        && existing.company_name == incoming.company_name
        && existing.description == incoming.description
        && existing.location == incoming.location
        && existing.remote == incoming.remote
        && existing.job_type == incoming.job_type
        && existing.salary_min == incoming.salary_min
        && existing.salary_max == incoming.salary_max
        && existing.skills_required == incoming.skills_required
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn upsert(&self, record: &JobRecord) -> Result<UpsertOutcome> {
        let conn = self.connect()?;
        let now = Utc::now().to_rfc3339();

        let existing = to_option(conn.query_row(
            "SELECT * FROM jobs WHERE source_url = ?",
            params![record.source_url],
            row_to_stored_job,
        ))?;

        match existing {
            None => {
                conn.execute(
                    r#"
                    INSERT INTO jobs (
                        id, title, company_name, description, location, remote,
                        job_type, salary_min, salary_max, skills_required,
                        source_url, posted_at, expires_at, active,
                        first_seen_at, last_seen_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
                "#,
                    params![
                        uuid::Uuid::new_v4().to_string(),
                        record.title,
                        record.company_name,
                        record.description,
                        record.location,
                        record.remote as i64,
                        record.job_type,
                        record.salary_min,
                        record.salary_max,
                        serde_json::to_string(&record.skills_required)?,
                        record.source_url,
                        record.posted_at.map(|dt| dt.to_rfc3339()),
                        record.expires_at.map(|dt| dt.to_rfc3339()),
                        now,
                        now,
                    ],
                )?;
                Ok(UpsertOutcome::Inserted)
            }
            Some(stored) if content_matches(&stored.record, record) => {
                conn.execute(
                    "UPDATE jobs SET last_seen_at = ?, active = 1 WHERE source_url = ?",
                    params![now, record.source_url],
                )?;
                Ok(UpsertOutcome::Skipped)
            }
            Some(_) => {
                conn.execute(
                    r#"
                    UPDATE jobs SET
                        title = ?, company_name = ?, description = ?, location = ?,
                        remote = ?, job_type = ?, salary_min = ?, salary_max = ?,
                        skills_required = ?, posted_at = ?, expires_at = ?,
                        active = 1, last_seen_at = ?
                    WHERE source_url = ?
                "#,
                    params![
                        record.title,
                        record.company_name,
                        record.description,
                        record.location,
                        record.remote as i64,
                        record.job_type,
                        record.salary_min,
                        record.salary_max,
                        serde_json::to_string(&record.skills_required)?,
                        record.posted_at.map(|dt| dt.to_rfc3339()),
                        record.expires_at.map(|dt| dt.to_rfc3339()),
                        now,
                        record.source_url,
                    ],
                )?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    async fn find_active_sample(&self, n: u32) -> Result<Vec<StoredJob>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE active = 1 ORDER BY RANDOM() LIMIT ?",
        )?;
        let jobs = stmt
            .query_map(params![n], row_to_stored_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    async fn get_active(&self, limit: u32) -> Result<Vec<StoredJob>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE active = 1 ORDER BY last_seen_at ASC LIMIT ?",
        )?;
        let jobs = stmt
            .query_map(params![limit], row_to_stored_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    async fn deactivate_expired(&self) -> Result<u64> {
        let conn = self.connect()?;
        let now = Utc::now().to_rfc3339();
        let count = conn.execute(
            "UPDATE jobs SET active = 0 WHERE active = 1 AND expires_at IS NOT NULL AND expires_at < ?",
            params![now],
        )?;
        Ok(count as u64)
    }

    async fn delete_stale(&self, days: u32) -> Result<u64> {
        let conn = self.connect()?;
        let cutoff = (Utc::now() - Duration::days(days as i64)).to_rfc3339();
        let count = conn.execute("DELETE FROM jobs WHERE last_seen_at < ?", params![cutoff])?;
        if count > 0 {
            debug!("deleted {} jobs not seen in {} days", count, days);
        }
        Ok(count as u64)
    }

    async fn mark_inactive(&self, source_url: &str) -> Result<bool> {
        let conn = self.connect()?;
        let count = conn.execute(
            "UPDATE jobs SET active = 0 WHERE source_url = ?",
            params![source_url],
        )?;
        Ok(count > 0)
    }

    async fn cleanup_stats(&self, stale_after_days: u32) -> Result<CleanupStats> {
        let conn = self.connect()?;
        let now = Utc::now().to_rfc3339();
        let stale_cutoff = (Utc::now() - Duration::days(stale_after_days as i64)).to_rfc3339();

        let total_jobs: u64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))?;
        let active_jobs: u64 =
            conn.query_row("SELECT COUNT(*) FROM jobs WHERE active = 1", [], |r| r.get(0))?;
        let expired_jobs: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE expires_at IS NOT NULL AND expires_at < ?",
            params![now],
            |r| r.get(0),
        )?;
        let stale_jobs: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE last_seen_at < ?",
            params![stale_cutoff],
            |r| r.get(0),
        )?;

        Ok(CleanupStats {
            total_jobs,
            active_jobs,
            expired_jobs,
            stale_jobs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, SqliteJobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::new(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn upsert_dedupes_on_source_url() {
        let (_dir, store) = temp_store();
        let record = JobRecord::new("Engineer", "Acme", "desc", "https://a.example.com/1");

        assert_eq!(store.upsert(&record).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(&record).await.unwrap(), UpsertOutcome::Skipped);

        let mut changed = record.clone();
        changed.description = "new description".into();
        assert_eq!(store.upsert(&changed).await.unwrap(), UpsertOutcome::Updated);

        let stats = store.cleanup_stats(365).await.unwrap();
        assert_eq!(stats.total_jobs, 1);
        assert_eq!(stats.active_jobs, 1);
    }

    #[tokio::test]
    async fn reupsert_reactivates_an_inactive_job() {
        let (_dir, store) = temp_store();
        let record = JobRecord::new("Engineer", "Acme", "desc", "https://a.example.com/1");
        store.upsert(&record).await.unwrap();
        assert!(store.mark_inactive(&record.source_url).await.unwrap());
        assert_eq!(store.cleanup_stats(365).await.unwrap().active_jobs, 0);

        store.upsert(&record).await.unwrap();
        assert_eq!(store.cleanup_stats(365).await.unwrap().active_jobs, 1);
    }

    #[tokio::test]
    async fn stale_count_follows_the_configured_threshold() {
        let (_dir, store) = temp_store();
        let record = JobRecord::new("Old", "Acme", "d", "https://a.example.com/old");
        store.upsert(&record).await.unwrap();
        let conn = store.connect().unwrap();
        let aged = (Utc::now() - Duration::days(60)).to_rfc3339();
        conn.execute("UPDATE jobs SET last_seen_at = ?", params![aged])
            .unwrap();

        // The reported stale count must track the deletion threshold.
        assert_eq!(store.cleanup_stats(30).await.unwrap().stale_jobs, 1);
        assert_eq!(store.cleanup_stats(365).await.unwrap().stale_jobs, 0);
    }

    #[tokio::test]
    async fn deactivates_only_expired_jobs() {
        let (_dir, store) = temp_store();
        let mut expired = JobRecord::new("Old", "Acme", "d", "https://a.example.com/old");
        expired.expires_at = Some(Utc::now() - Duration::days(1));
        let mut live = JobRecord::new("Live", "Acme", "d", "https://a.example.com/live");
        live.expires_at = Some(Utc::now() + Duration::days(30));
        store.upsert(&expired).await.unwrap();
        store.upsert(&live).await.unwrap();

        assert_eq!(store.deactivate_expired().await.unwrap(), 1);
        let active = store.get_active(10).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].record.title, "Live");
    }
}
