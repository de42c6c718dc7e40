//! JSON API extraction.
//!
//! Maps a source's JSON payload to canonical records. Entries missing
//! required fields (title, company) are dropped, and postings older
//! than the one-year staleness cutoff are discarded here at extraction
//! time, not later in the pipeline.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use tracing::debug;

use crate::extract::refine;
use crate::models::JobRecord;
use crate::utils::html::strip_tags;

const STALENESS_DAYS: i64 = 365;

/// Pull the posting array out of the payload. Accepts a bare array or
/// common wrapper keys (`jobs`, `data`, `results`).
fn posting_array(value: &Value) -> Option<&Vec<Value>> {
    if let Some(arr) = value.as_array() {
        return Some(arr);
    }
    for key in ["jobs", "data", "results"] {
        if let Some(arr) = value.get(key).and_then(Value::as_array) {
            return Some(arr);
        }
    }
    None
}

fn first_str<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_str))
}

fn first_i64(obj: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| {
        let v = obj.get(*k)?;
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    })
}

fn posted_at(obj: &Value) -> Option<DateTime<Utc>> {
    if let Some(epoch) = obj.get("epoch").and_then(Value::as_i64) {
        return Utc.timestamp_opt(epoch, 0).single();
    }
    first_str(obj, &["date", "publication_date", "posted_at", "created_at"]).and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .or_else(|_| DateTime::parse_from_rfc2822(s))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn map_entry(obj: &Value, source_id: &str) -> Option<JobRecord> {
    // Required fields; API metadata/legal-notice elements lack them.
    let title = first_str(obj, &["position", "title", "job_title"])?.trim();
    let company = first_str(obj, &["company", "company_name"])?.trim();
    if title.is_empty() || company.is_empty() {
        return None;
    }

    let url = first_str(obj, &["url", "apply_url", "link"])?.to_string();
    let description = strip_tags(first_str(obj, &["description", "text"]).unwrap_or(""));

    let mut record = JobRecord::new(title, company, description, url);
    record.posted_at = posted_at(obj);
    record.location = first_str(obj, &["location", "candidate_required_location"])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    record.salary_min = first_i64(obj, &["salary_min"]);
    record.salary_max = first_i64(obj, &["salary_max"]);

    if let Some(tags) = obj.get("tags").and_then(Value::as_array) {
        record.skills_required = tags
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.to_lowercase())
            .collect();
    }
    if record.skills_required.is_empty() {
        record.skills_required = refine::extract_skills(&record.description);
    }

    let text = format!("{} {}", record.title, record.description);
    record.remote = record
        .location
        .as_deref()
        .map(refine::detect_remote)
        .unwrap_or(false)
        || refine::detect_remote(&text)
        || source_id.contains("remote");
    record.job_type = first_str(obj, &["job_type", "employment_type"])
        .map(|s| s.to_lowercase())
        .or_else(|| refine::detect_job_type(&text));
    Some(record)
}

/// Extract records from an API body. Unparseable bodies yield nothing.
pub fn extract(body: &str, source_id: &str) -> Vec<JobRecord> {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            debug!("api body for {} is not valid JSON: {}", source_id, e);
            return Vec::new();
        }
    };

    let Some(entries) = posting_array(&value) else {
        return Vec::new();
    };

    let cutoff = Utc::now() - Duration::days(STALENESS_DAYS);
    entries
        .iter()
        .filter_map(|entry| map_entry(entry, source_id))
        .filter(|record| match record.posted_at {
            Some(posted) => posted >= cutoff,
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_entries_and_drops_incomplete() {
        let body = r#"[
            {"legal": "API terms of service"},
            {"position": "Platform Engineer", "company": "Acme",
             "url": "https://example.com/p1", "description": "<b>Go</b> and aws",
             "location": "Remote", "salary_min": 90000, "salary_max": 120000,
             "tags": ["golang", "aws"]},
            {"position": "Ghost", "company": "", "url": "https://example.com/p2"}
        ]"#;
        let records = extract(body, "remoteok");
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.title, "Platform Engineer");
        assert_eq!(r.company_name, "Acme");
        assert_eq!(r.description, "Go and aws");
        assert!(r.remote);
        assert_eq!(r.salary_min, Some(90000));
        assert_eq!(r.skills_required, vec!["golang", "aws"]);
    }

    #[test]
    fn discards_stale_postings_at_extraction_time() {
        let old = (Utc::now() - Duration::days(400)).to_rfc3339();
        let fresh = (Utc::now() - Duration::days(3)).to_rfc3339();
        let body = format!(
            r#"{{"jobs": [
                {{"title": "Old", "company": "A", "url": "https://e.com/1", "date": "{old}"}},
                {{"title": "Fresh", "company": "B", "url": "https://e.com/2", "date": "{fresh}"}}
            ]}}"#
        );
        let records = extract(&body, "api");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Fresh");
    }

    #[test]
    fn invalid_json_yields_nothing() {
        assert!(extract("not json at all", "api").is_empty());
    }
}
