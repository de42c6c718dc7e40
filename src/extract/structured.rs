//! Structured-data extraction from HTML.
//!
//! Scans `<script type="application/ld+json">` blocks for schema.org
//! JobPosting objects. This is the first strategy tried for any HTML
//! page since the data is machine-authored and needs no inference.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::extract::refine;
use crate::models::JobRecord;
use crate::utils::html::strip_tags;

/// Extract every JobPosting found in the page's JSON-LD blocks.
pub fn extract(html: &str, url: &str) -> Vec<JobRecord> {
    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse(r#"script[type="application/ld+json"]"#)
        .expect("static selector");

    let mut records = Vec::new();
    for script in document.select(&selector) {
        let raw = script.text().collect::<String>();
        let value: Value = match serde_json::from_str(raw.trim()) {
            Ok(v) => v,
            Err(e) => {
                debug!("skipping malformed JSON-LD block on {}: {}", url, e);
                continue;
            }
        };
        collect_postings(&value, url, &mut records);
    }
    records
}

/// JSON-LD may be a single object, an array of objects, or an object
/// wrapping an `@graph` array. Walk all three shapes.
fn collect_postings(value: &Value, url: &str, out: &mut Vec<JobRecord>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_postings(item, url, out);
            }
        }
        Value::Object(obj) => {
            if let Some(graph) = obj.get("@graph") {
                collect_postings(graph, url, out);
            }
            if is_job_posting(value) {
                if let Some(record) = map_posting(value, url) {
                    out.push(record);
                }
            }
        }
        _ => {}
    }
}

fn is_job_posting(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(s)) => s == "JobPosting",
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("JobPosting")),
        _ => false,
    }
}

fn parse_date(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let s = value?.as_str()?;
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            // Bare dates like "2025-06-01" are common in the wild.
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })
}

fn org_name(value: &Value) -> Option<String> {
    let org = value.get("hiringOrganization")?;
    let name = org
        .as_str()
        .or_else(|| org.get("name").and_then(Value::as_str))?;
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn location_text(value: &Value) -> Option<String> {
    let loc = value.get("jobLocation")?;
    // jobLocation may be a list of Places.
    let place = loc.as_array().and_then(|a| a.first()).unwrap_or(loc);
    let address = place.get("address")?;
    if let Some(s) = address.as_str() {
        return Some(s.to_string());
    }
    let parts: Vec<&str> = ["addressLocality", "addressRegion", "addressCountry"]
        .iter()
        .filter_map(|k| address.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

fn salary_bounds(value: &Value) -> (Option<i64>, Option<i64>) {
    let Some(base) = value.get("baseSalary") else {
        return (None, None);
    };
    let val = base.get("value").unwrap_or(base);
    let as_i64 = |v: &Value| {
        v.as_i64()
            .or_else(|| v.as_f64().map(|f| f as i64))
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    };
    let min = val.get("minValue").and_then(|v| as_i64(v));
    let max = val.get("maxValue").and_then(|v| as_i64(v));
    match (min, max) {
        (None, None) => {
            let single = val.get("value").and_then(|v| as_i64(v));
            (single, single)
        }
        pair => pair,
    }
}

/// Resolve a posting URL, which in the wild is often relative to the
/// page that embeds it.
fn absolutize(candidate: &str, page_url: &str) -> String {
    match url::Url::parse(candidate) {
        Ok(u) => u.to_string(),
        Err(_) => url::Url::parse(page_url)
            .and_then(|base| base.join(candidate))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| page_url.to_string()),
    }
}

fn map_posting(value: &Value, page_url: &str) -> Option<JobRecord> {
    let title = value.get("title").and_then(Value::as_str)?.trim();
    let company = org_name(value)?;
    if title.is_empty() {
        return None;
    }

    let description = strip_tags(value.get("description").and_then(Value::as_str).unwrap_or(""));
    let source_url = value
        .get("url")
        .and_then(Value::as_str)
        .map(|u| absolutize(u, page_url))
        .unwrap_or_else(|| page_url.to_string());

    let mut record = JobRecord::new(title, company, description, source_url);
    record.posted_at = parse_date(value.get("datePosted"));
    record.expires_at = parse_date(value.get("validThrough"));
    record.location = location_text(value);
    (record.salary_min, record.salary_max) = salary_bounds(value);

    let telecommute = value
        .get("jobLocationType")
        .and_then(Value::as_str)
        .map(|s| s.eq_ignore_ascii_case("TELECOMMUTE"))
        .unwrap_or(false);
    let text = format!("{} {}", record.title, record.description);
    record.remote = telecommute || refine::detect_remote(&text);
    record.job_type = value
        .get("employmentType")
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Array(a) => a.first().and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .map(|s| s.to_lowercase().replace('_', "-"))
        .or_else(|| refine::detect_job_type(&text));
    record.skills_required = refine::extract_skills(&record.description);
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_a_job_posting_block() {
        let html = r#"<html><head>
            <script type="application/ld+json">
            {
              "@context": "https://schema.org",
              "@type": "JobPosting",
              "title": "Senior Rust Engineer",
              "hiringOrganization": {"@type": "Organization", "name": "Ferrous"},
              "description": "<p>Build rust services with postgres and kubernetes.</p>",
              "datePosted": "2025-05-01",
              "validThrough": "2025-09-01T00:00:00Z",
              "jobLocationType": "TELECOMMUTE",
              "employmentType": "FULL_TIME",
              "baseSalary": {"@type": "MonetaryAmount",
                             "value": {"minValue": 140000, "maxValue": 180000}}
            }
            </script>
            </head><body></body></html>"#;
        let records = extract(html, "https://careers.example.com/rust");
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.title, "Senior Rust Engineer");
        assert_eq!(r.company_name, "Ferrous");
        assert!(r.remote);
        assert_eq!(r.job_type.as_deref(), Some("full-time"));
        assert_eq!(r.salary_min, Some(140000));
        assert_eq!(r.salary_max, Some(180000));
        assert!(r.expires_at.is_some());
        assert!(r.skills_required.contains(&"rust".to_string()));
    }

    #[test]
    fn walks_graph_wrappers_and_arrays() {
        let html = r#"<script type="application/ld+json">
            {"@graph": [
                {"@type": "Organization", "name": "Ignored"},
                {"@type": "JobPosting", "title": "QA Analyst",
                 "hiringOrganization": "Testly",
                 "url": "https://jobs.example.com/qa"}
            ]}
            </script>"#;
        let records = extract(html, "https://jobs.example.com");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_url, "https://jobs.example.com/qa");
        assert_eq!(records[0].company_name, "Testly");
    }

    #[test]
    fn relative_posting_urls_resolve_against_the_page() {
        let html = r#"<script type="application/ld+json">
            {"@type": "JobPosting", "title": "Support Engineer",
             "hiringOrganization": "Helply", "url": "/jobs/42"}
            </script>"#;
        let records = extract(html, "https://helply.example.com/careers");
        assert_eq!(records[0].source_url, "https://helply.example.com/jobs/42");
    }

    #[test]
    fn ignores_postings_without_an_organization() {
        let html = r#"<script type="application/ld+json">
            {"@type": "JobPosting", "title": "Mystery Role"}
            </script>"#;
        assert!(extract(html, "https://x.example.com").is_empty());
    }
}
