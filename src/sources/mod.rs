//! Job sources.
//!
//! A source knows how to pull postings from one upstream site. The
//! registry is built once from configuration and validated up front so
//! a bad source definition fails at startup, not mid-run.

pub mod api;
pub mod feed;
pub mod universal;

pub use api::ApiSource;
pub use feed::FeedSource;
pub use universal::UniversalSource;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::browser::BrowserSessionPool;
use crate::config::{Settings, SourceConfig};
use crate::error::{Result, ScrapeError};
use crate::extract::{refine, AiFallbackExtractor};
use crate::fetch::HttpFetcher;
use crate::models::{JobRecord, ScrapeRunStats, TaskPayload};
use crate::store::{JobStore, UpsertOutcome};

/// How a source's content is retrieved and parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// RSS/Atom feed, one fetch per configured category.
    Feed,
    /// JSON API endpoint with an optional browser-rendered fallback page.
    Api,
    /// Arbitrary URLs, content kind sniffed per page.
    Universal,
}

#[async_trait]
pub trait JobSource: Send + Sync {
    fn id(&self) -> &str;

    /// Pull postings from the upstream. Per-item failures are logged
    /// and skipped; only a total failure returns Err.
    async fn scrape(&self, payload: &TaskPayload) -> Result<Vec<JobRecord>>;

    /// Scrape and persist, producing run counters. Records that fail
    /// basic plausibility checks are dropped before they reach the
    /// store.
    async fn scrape_and_save(
        &self,
        store: &dyn JobStore,
        payload: &TaskPayload,
    ) -> Result<ScrapeRunStats> {
        let started_at = Utc::now();
        let records = self.scrape(payload).await?;

        let mut saved = 0;
        let mut updated = 0;
        let mut skipped = 0;
        let mut errors = 0;
        for record in &records {
            if record.source_url.is_empty() || refine::is_junk_title(&record.title) {
                continue;
            }
            match store.upsert(record).await {
                Ok(UpsertOutcome::Inserted) => saved += 1,
                Ok(UpsertOutcome::Updated) => updated += 1,
                Ok(UpsertOutcome::Skipped) => skipped += 1,
                Err(e) => {
                    warn!("failed to save {}: {}", record.source_url, e);
                    errors += 1;
                }
            }
        }

        let stats = ScrapeRunStats {
            source_id: self.id().to_string(),
            saved,
            updated,
            skipped,
            errors,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            source = self.id(),
            saved = stats.saved,
            updated = stats.updated,
            skipped = stats.skipped,
            errors = stats.errors,
            "scrape run finished"
        );
        Ok(stats)
    }
}

/// Immutable lookup of configured sources.
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn JobSource>>,
}

impl SourceRegistry {
    pub fn get(&self, id: &str) -> Result<Arc<dyn JobSource>> {
        self.sources
            .get(id)
            .cloned()
            .ok_or_else(|| ScrapeError::UnknownSource(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Shared collaborators handed to every source.
pub struct SourceDeps {
    pub fetcher: Arc<HttpFetcher>,
    pub browser: Option<Arc<BrowserSessionPool>>,
    pub ai: Option<Arc<AiFallbackExtractor>>,
}

/// Build the registry from configuration, rejecting invalid entries.
pub fn build_registry(settings: &Settings, deps: &SourceDeps) -> Result<SourceRegistry> {
    let mut sources: HashMap<String, Arc<dyn JobSource>> = HashMap::new();
    for config in &settings.sources {
        let source = build_source(config, settings, deps)?;
        if sources.insert(config.id.clone(), source).is_some() {
            return Err(ScrapeError::ExtractionInvalid(format!(
                "duplicate source id in config: {}",
                config.id
            )));
        }
    }
    Ok(SourceRegistry { sources })
}

fn build_source(
    config: &SourceConfig,
    settings: &Settings,
    deps: &SourceDeps,
) -> Result<Arc<dyn JobSource>> {
    match config.kind {
        SourceKind::Feed => {
            let endpoint = config.endpoint.clone().ok_or_else(|| {
                ScrapeError::ExtractionInvalid(format!(
                    "feed source {} has no endpoint template",
                    config.id
                ))
            })?;
            if config.categories.is_empty() {
                return Err(ScrapeError::ExtractionInvalid(format!(
                    "feed source {} has no categories",
                    config.id
                )));
            }
            Ok(Arc::new(FeedSource::new(
                config.id.clone(),
                endpoint,
                config.categories.clone(),
                deps.fetcher.clone(),
            )))
        }
        SourceKind::Api => {
            let endpoint = config.endpoint.clone().ok_or_else(|| {
                ScrapeError::ExtractionInvalid(format!(
                    "api source {} has no endpoint",
                    config.id
                ))
            })?;
            Ok(Arc::new(ApiSource::new(
                config.id.clone(),
                endpoint,
                config.fallback_url.clone(),
                deps.fetcher.clone(),
                deps.browser.clone(),
                deps.ai.clone(),
            )))
        }
        SourceKind::Universal => Ok(Arc::new(UniversalSource::new(
            config.id.clone(),
            config.urls.clone(),
            settings.politeness_delay(),
            deps.fetcher.clone(),
            deps.browser.clone(),
            deps.ai.clone(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;

    struct FixedSource(Vec<JobRecord>);

    #[async_trait]
    impl JobSource for FixedSource {
        fn id(&self) -> &str {
            "fixed"
        }
        async fn scrape(&self, _payload: &TaskPayload) -> Result<Vec<JobRecord>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn scrape_and_save_counts_outcomes() {
        let record = JobRecord::new(
            "Backend Engineer",
            "Acme",
            "Build backend services",
            "https://example.com/1",
        );
        let source = FixedSource(vec![record.clone(), record]);
        let store = MemoryJobStore::new();

        let stats = source
            .scrape_and_save(&store, &TaskPayload::default())
            .await
            .unwrap();
        // Same URL twice: one insert, one unchanged re-see.
        assert_eq!(stats.saved, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn junk_titles_never_reach_the_store() {
        let junk = JobRecord::new("Sign in", "Acme", "d", "https://example.com/login");
        let source = FixedSource(vec![junk]);
        let store = MemoryJobStore::new();
        let stats = source
            .scrape_and_save(&store, &TaskPayload::default())
            .await
            .unwrap();
        assert_eq!(stats.total(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn registry_rejects_feed_without_categories() {
        let mut settings = Settings::default();
        settings.sources = vec![SourceConfig {
            id: "bad".into(),
            kind: SourceKind::Feed,
            endpoint: Some("https://example.com/{category}.rss".into()),
            categories: Vec::new(),
            urls: Vec::new(),
            fallback_url: None,
        }];
        let deps = SourceDeps {
            fetcher: Arc::new(
                HttpFetcher::new(std::time::Duration::from_secs(5), "test-agent").unwrap(),
            ),
            browser: None,
            ai: None,
        };
        assert!(build_registry(&settings, &deps).is_err());
    }

    #[test]
    fn registry_resolves_default_sources() {
        let settings = Settings::default();
        let deps = SourceDeps {
            fetcher: Arc::new(
                HttpFetcher::new(std::time::Duration::from_secs(5), "test-agent").unwrap(),
            ),
            browser: None,
            ai: None,
        };
        let registry = build_registry(&settings, &deps).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.get("weworkremotely").is_ok());
        assert!(registry.get("nope").is_err());
    }
}
