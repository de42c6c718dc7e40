//! Plain HTTP fetch path (no JS execution).
//!
//! Used for sources that serve static feeds or JSON APIs, and for the
//! cheap reachability checks in validation/cleanup. No internal retry:
//! retry policy belongs to the queue so rotation and backoff stay
//! composable.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, ScrapeError};

/// Minimal text-fetch seam so source scrapers are testable offline.
#[async_trait]
pub trait TextFetcher: Send + Sync {
    /// GET a URL and return the body. `FetchFailed` on non-2xx or
    /// network error.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// Outcome of a validation probe against a stored record's URL.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub status: u16,
    pub body: String,
}

/// reqwest-backed fetch client.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }

    /// GET with status + body, for validation phrase checks. Network
    /// errors still surface as `FetchFailed`; callers decide whether
    /// that is fatal (scraping) or ignorable (fail-open validation).
    pub async fn probe(&self, url: &str) -> Result<ProbeResult> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::fetch(url, e))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Ok(ProbeResult { status, body })
    }

    /// HEAD request returning only the status code.
    pub async fn head_status(&self, url: &str) -> Result<u16> {
        let resp = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| ScrapeError::fetch(url, e))?;
        Ok(resp.status().as_u16())
    }
}

#[async_trait]
impl TextFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::fetch(url, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScrapeError::fetch(url, format!("HTTP {}", status.as_u16())));
        }
        resp.text().await.map_err(|e| ScrapeError::fetch(url, e))
    }
}
