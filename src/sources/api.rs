//! JSON API source with a browser-rendered degraded mode.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::JobSource;
use crate::browser::BrowserSessionPool;
use crate::error::Result;
use crate::extract::{self, json_api, AiFallbackExtractor};
use crate::fetch::TextFetcher;
use crate::models::{JobRecord, TaskPayload};

pub struct ApiSource {
    id: String,
    endpoint: String,
    /// Listing page rendered in the browser when the API is down.
    fallback_url: Option<String>,
    fetcher: Arc<dyn TextFetcher>,
    browser: Option<Arc<BrowserSessionPool>>,
    ai: Option<Arc<AiFallbackExtractor>>,
}

impl ApiSource {
    pub fn new(
        id: String,
        endpoint: String,
        fallback_url: Option<String>,
        fetcher: Arc<dyn TextFetcher>,
        browser: Option<Arc<BrowserSessionPool>>,
        ai: Option<Arc<AiFallbackExtractor>>,
    ) -> Self {
        Self {
            id,
            endpoint,
            fallback_url,
            fetcher,
            browser,
            ai,
        }
    }

    /// Render the fallback listing page and extract from its HTML.
    /// Results here are typically thinner than the API's.
    async fn scrape_fallback(
        &self,
        browser: &BrowserSessionPool,
        url: &str,
    ) -> Result<Vec<JobRecord>> {
        let html = browser.fetch_page(url).await?;
        Ok(extract::extract_html(&html, url, self.ai.as_deref()).await)
    }
}

#[async_trait]
impl JobSource for ApiSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn scrape(&self, _payload: &TaskPayload) -> Result<Vec<JobRecord>> {
        match self.fetcher.fetch_text(&self.endpoint).await {
            Ok(body) => Ok(json_api::extract(&body, &self.id)),
            Err(e) => match (&self.fallback_url, &self.browser) {
                (Some(url), Some(browser)) => {
                    warn!(
                        "api fetch failed for {} ({}), degrading to rendered page {}",
                        self.id, e, url
                    );
                    self.scrape_fallback(browser, url).await
                }
                _ => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScrapeError;

    struct OneShot(Result<String>);

    #[async_trait]
    impl TextFetcher for OneShot {
        async fn fetch_text(&self, _url: &str) -> Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(ScrapeError::fetch("x", "down")),
            }
        }
    }

    #[tokio::test]
    async fn maps_api_body_through_the_json_extractor() {
        let body = r#"[{"position": "SRE", "company": "Acme", "url": "https://a.example.com/1"}]"#;
        let source = ApiSource::new(
            "remoteok".into(),
            "https://a.example.com/api".into(),
            None,
            Arc::new(OneShot(Ok(body.into()))),
            None,
            None,
        );
        let records = source.scrape(&TaskPayload::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "SRE");
    }

    #[tokio::test]
    async fn api_failure_without_fallback_is_an_error() {
        let source = ApiSource::new(
            "remoteok".into(),
            "https://a.example.com/api".into(),
            Some("https://a.example.com/jobs".into()),
            Arc::new(OneShot(Err(ScrapeError::fetch("x", "down")))),
            None, // no browser, so the fallback URL cannot help
            None,
        );
        assert!(source.scrape(&TaskPayload::default()).await.is_err());
    }
}
