//! RSS/Atom feed source.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::JobSource;
use crate::error::Result;
use crate::extract::rss;
use crate::fetch::TextFetcher;
use crate::models::{JobRecord, TaskPayload};

/// Concurrent category fetches per feed source.
const CATEGORY_CONCURRENCY: usize = 3;

pub struct FeedSource {
    id: String,
    /// URL template with a `{category}` placeholder.
    endpoint: String,
    categories: Vec<String>,
    fetcher: Arc<dyn TextFetcher>,
}

impl FeedSource {
    pub fn new(
        id: String,
        endpoint: String,
        categories: Vec<String>,
        fetcher: Arc<dyn TextFetcher>,
    ) -> Self {
        Self {
            id,
            endpoint,
            categories,
            fetcher,
        }
    }

    fn category_url(&self, category: &str) -> String {
        self.endpoint.replace("{category}", category)
    }
}

#[async_trait]
impl JobSource for FeedSource {
    fn id(&self) -> &str {
        &self.id
    }

    /// Fetch every configured category. A category that fails to fetch
    /// or parse costs only its own items.
    async fn scrape(&self, _payload: &TaskPayload) -> Result<Vec<JobRecord>> {
        let urls: Vec<String> = self
            .categories
            .iter()
            .map(|c| self.category_url(c))
            .collect();
        let results = stream::iter(urls)
            .map(|url| {
                let fetcher = self.fetcher.clone();
                async move {
                    match fetcher.fetch_text(&url).await {
                        Ok(body) => {
                            let records = rss::extract(&body);
                            debug!("{}: {} items", url, records.len());
                            records
                        }
                        Err(e) => {
                            warn!("feed fetch failed for {}: {}", url, e);
                            Vec::new()
                        }
                    }
                }
            })
            .buffer_unordered(CATEGORY_CONCURRENCY)
            .collect::<Vec<Vec<JobRecord>>>()
            .await;

        Ok(results.into_iter().flatten().collect())
    }
}
