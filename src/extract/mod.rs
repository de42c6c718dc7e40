//! Content extraction strategies.
//!
//! Fetched content is sniffed into a [`ContentKind`] and routed to the
//! matching extractor. HTML always tries embedded structured data first;
//! the AI fallback only runs when that yields nothing, and an empty
//! result from any strategy is not an error.

pub mod ai;
pub mod json_api;
pub mod refine;
pub mod rss;
pub mod structured;

use tracing::debug;

pub use ai::{AiFallbackExtractor, TextGenerator};

use crate::models::{ContentKind, JobRecord};

/// Determine the content kind of a fetched body.
///
/// Leading `<?xml` / `<rss` means a feed; a body that parses as JSON is
/// JSON; everything else is treated as HTML.
pub fn sniff_content_kind(body: &str) -> ContentKind {
    let head = body.trim_start();
    if head.starts_with("<?xml") || head.starts_with("<rss") || head.starts_with("<feed") {
        return ContentKind::Rss;
    }
    if serde_json::from_str::<serde_json::Value>(body).is_ok() {
        return ContentKind::Json;
    }
    ContentKind::Html
}

/// Run the structured-data-first / AI-fallback chain over HTML.
///
/// HTML is the least trustworthy input, so everything recovered here
/// passes the plausibility gate before it leaves the module.
pub async fn extract_html(
    html: &str,
    url: &str,
    ai: Option<&AiFallbackExtractor>,
) -> Vec<JobRecord> {
    let records = structured::extract(html, url);
    let records = if !records.is_empty() {
        debug!("structured data yielded {} records for {}", records.len(), url);
        records
    } else {
        match ai {
            Some(extractor) => extractor.extract(html, url).await,
            None => Vec::new(),
        }
    };

    records
        .into_iter()
        .filter(|r| {
            let keep = refine::is_plausible_posting(&r.title, &r.description);
            if !keep {
                debug!("dropping implausible posting {:?} from {}", r.title, url);
            }
            keep
        })
        .collect()
}

/// Route sniffed content to its extractor.
pub async fn extract_any(
    body: &str,
    url: &str,
    source_id: &str,
    ai: Option<&AiFallbackExtractor>,
) -> Vec<JobRecord> {
    match sniff_content_kind(body) {
        ContentKind::Rss => rss::extract(body),
        ContentKind::Json => json_api::extract(body, source_id),
        ContentKind::Html => extract_html(body, url, ai).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_rss() {
        assert_eq!(
            sniff_content_kind("<?xml version=\"1.0\"?><rss/>"),
            ContentKind::Rss
        );
        assert_eq!(sniff_content_kind("  <rss version=\"2.0\">"), ContentKind::Rss);
    }

    #[test]
    fn sniffs_json() {
        assert_eq!(sniff_content_kind("[{\"a\":1}]"), ContentKind::Json);
        assert_eq!(sniff_content_kind("{\"a\":1}"), ContentKind::Json);
    }

    #[test]
    fn everything_else_is_html() {
        assert_eq!(sniff_content_kind("<!doctype html><html>"), ContentKind::Html);
        assert_eq!(sniff_content_kind("plain words"), ContentKind::Html);
    }

    #[tokio::test]
    async fn html_records_pass_through_the_plausibility_gate() {
        let html = r#"<html><script type="application/ld+json">
            [{"@type": "JobPosting", "title": "Platform Engineer",
              "hiringOrganization": {"name": "Acme"},
              "description": "Responsibilities include operating the platform. Requirements: three years of Kubernetes experience. Salary and benefits are competitive.",
              "url": "https://a.example.com/jobs/1"},
             {"@type": "JobPosting", "title": "Apply Now",
              "hiringOrganization": {"name": "Acme"},
              "description": "short",
              "url": "https://a.example.com/jobs/2"}]
            </script></html>"#;
        let records = extract_html(html, "https://a.example.com/careers", None).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Platform Engineer");
    }
}
