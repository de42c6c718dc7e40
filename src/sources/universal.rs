//! Universal source: arbitrary URLs with sniffed content handling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::JobSource;
use crate::browser::BrowserSessionPool;
use crate::error::Result;
use crate::extract::{self, AiFallbackExtractor};
use crate::fetch::TextFetcher;
use crate::models::{ContentKind, JobRecord, TaskPayload};

pub struct UniversalSource {
    id: String,
    /// Default URL list; a task payload may carry its own.
    urls: Vec<String>,
    politeness_delay: Duration,
    fetcher: Arc<dyn TextFetcher>,
    browser: Option<Arc<BrowserSessionPool>>,
    ai: Option<Arc<AiFallbackExtractor>>,
}

impl UniversalSource {
    pub fn new(
        id: String,
        urls: Vec<String>,
        politeness_delay: Duration,
        fetcher: Arc<dyn TextFetcher>,
        browser: Option<Arc<BrowserSessionPool>>,
        ai: Option<Arc<AiFallbackExtractor>>,
    ) -> Self {
        Self {
            id,
            urls,
            politeness_delay,
            fetcher,
            browser,
            ai,
        }
    }

    async fn scrape_one(&self, url: &str) -> Result<Vec<JobRecord>> {
        match self.fetcher.fetch_text(url).await {
            Ok(body) => {
                let kind = extract::sniff_content_kind(&body);
                let records = extract::extract_any(&body, url, &self.id, self.ai.as_deref()).await;
                // A JS-heavy page often serves an empty shell over
                // plain HTTP; rendering it is the second chance.
                if records.is_empty() && kind == ContentKind::Html {
                    if let Some(browser) = &self.browser {
                        debug!("static fetch of {} yielded nothing, rendering", url);
                        let html = browser.fetch_page(url).await?;
                        return Ok(extract::extract_html(&html, url, self.ai.as_deref()).await);
                    }
                }
                Ok(records)
            }
            Err(e) => match &self.browser {
                Some(browser) => {
                    debug!("static fetch of {} failed ({}), rendering", url, e);
                    let html = browser.fetch_page(url).await?;
                    Ok(extract::extract_html(&html, url, self.ai.as_deref()).await)
                }
                None => Err(e),
            },
        }
    }
}

#[async_trait]
impl JobSource for UniversalSource {
    fn id(&self) -> &str {
        &self.id
    }

    /// Work through the URL list with a politeness delay between
    /// pages. One bad URL costs only its own results.
    async fn scrape(&self, payload: &TaskPayload) -> Result<Vec<JobRecord>> {
        let urls = if payload.urls.is_empty() {
            &self.urls
        } else {
            &payload.urls
        };

        let mut records = Vec::new();
        for (i, url) in urls.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.politeness_delay).await;
            }
            match self.scrape_one(url).await {
                Ok(found) => {
                    debug!("{}: {} postings", url, found.len());
                    records.extend(found);
                }
                Err(e) => warn!("skipping {}: {}", url, e),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScrapeError;
    use std::collections::HashMap;

    struct MapFetcher(HashMap<String, String>);

    #[async_trait]
    impl TextFetcher for MapFetcher {
        async fn fetch_text(&self, url: &str) -> Result<String> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| ScrapeError::fetch(url, "not found"))
        }
    }

    fn jsonld_page() -> String {
        r#"<html><script type="application/ld+json">
           {"@type": "JobPosting", "title": "Compiler Engineer",
            "hiringOrganization": {"name": "Langsmith"},
            "description": "Responsibilities include optimizer work. Requirements: five years of compiler experience. Salary and benefits are competitive.",
            "url": "https://l.example.com/jobs/7"}
           </script></html>"#
            .to_string()
    }

    #[tokio::test]
    async fn sniffs_and_extracts_per_url() {
        let mut bodies = HashMap::new();
        bodies.insert("https://l.example.com/careers".to_string(), jsonld_page());
        bodies.insert(
            "https://j.example.com/api".to_string(),
            r#"[{"title": "DBA", "company": "Dataco", "url": "https://j.example.com/1"}]"#.into(),
        );
        let source = UniversalSource::new(
            "universal".into(),
            Vec::new(),
            Duration::from_millis(0),
            Arc::new(MapFetcher(bodies)),
            None,
            None,
        );

        let payload = TaskPayload {
            urls: vec![
                "https://l.example.com/careers".into(),
                "https://j.example.com/api".into(),
            ],
            ..Default::default()
        };
        let mut titles: Vec<String> = source
            .scrape(&payload)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["Compiler Engineer", "DBA"]);
    }

    #[tokio::test]
    async fn unreachable_url_is_skipped_not_fatal() {
        let mut bodies = HashMap::new();
        bodies.insert("https://l.example.com/careers".to_string(), jsonld_page());
        let source = UniversalSource::new(
            "universal".into(),
            Vec::new(),
            Duration::from_millis(0),
            Arc::new(MapFetcher(bodies)),
            None,
            None,
        );
        let payload = TaskPayload {
            urls: vec![
                "https://dead.example.com/".into(),
                "https://l.example.com/careers".into(),
            ],
            ..Default::default()
        };
        let records = source.scrape(&payload).await.unwrap();
        assert_eq!(records.len(), 1);
    }
}
