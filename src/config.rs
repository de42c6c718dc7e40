//! Configuration management for Jobhound.
//!
//! Settings load from a TOML file (default `jobhound.toml` next to the
//! database) with environment overrides applied on top. Magic constants
//! from the pipeline (rotation probability, verification sample size)
//! are tunables here rather than hardcoded.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sources::SourceKind;

fn default_db_path() -> PathBuf {
    PathBuf::from("jobhound.db")
}

fn default_rotation_probability() -> f64 {
    0.3
}

fn default_verify_sample_size() -> usize {
    5
}

fn default_scrape_workers() -> usize {
    5
}

fn default_validation_workers() -> usize {
    20
}

fn default_dispatch_min_interval_ms() -> u64 {
    100
}

fn default_politeness_delay_ms() -> u64 {
    2000
}

fn default_stale_after_days() -> i64 {
    365
}

fn default_max_attempts() -> u32 {
    3
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36"
        .to_string()
}

// 6-field cron expressions (seconds first).
fn default_scrape_cron() -> String {
    "0 0 */4 * * *".to_string()
}

fn default_cleanup_cron() -> String {
    "0 0 3 * * *".to_string()
}

fn default_validate_cron() -> String {
    "0 0 0 * * *".to_string()
}

/// One configured external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    /// Feed template (`{category}` substituted) or API endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Feed categories fanned out per scrape.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Fixed URL list for universal sources.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Browser-rendered listing page used when an API call fails entirely.
    #[serde(default)]
    pub fallback_url: Option<String>,
}

/// Optional text-generation collaborator for the AI extraction fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_ai_model")]
    pub model: String,
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,

    /// Probability of rotating the browser fingerprint after a
    /// successfully completed scrape task.
    #[serde(default = "default_rotation_probability")]
    pub rotation_probability: f64,

    /// Active records sampled for reachability per cleanup run.
    #[serde(default = "default_verify_sample_size")]
    pub verify_sample_size: usize,

    #[serde(default = "default_scrape_workers")]
    pub scrape_workers: usize,

    #[serde(default = "default_validation_workers")]
    pub validation_workers: usize,

    /// Minimum spacing between dispatch fan-outs (thundering-herd guard).
    #[serde(default = "default_dispatch_min_interval_ms")]
    pub dispatch_min_interval_ms: u64,

    /// Delay between URLs in a universal-source run.
    #[serde(default = "default_politeness_delay_ms")]
    pub politeness_delay_ms: u64,

    /// Records older than this are hard-deleted by cleanup.
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Claimed tasks older than this are reclaimable (at-least-once).
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_scrape_cron")]
    pub scrape_cron: String,

    #[serde(default = "default_cleanup_cron")]
    pub cleanup_cron: String,

    #[serde(default = "default_validate_cron")]
    pub validate_cron: String,

    #[serde(default)]
    pub ai: Option<AiSettings>,

    #[serde(default = "Settings::default_sources")]
    pub sources: Vec<SourceConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        toml::from_str("").expect("empty settings deserialize")
    }
}

impl Settings {
    /// Load settings from an explicit path, or `jobhound.toml` in the
    /// working directory when present, falling back to defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let candidate = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("jobhound.toml"));

        let mut settings: Settings = if candidate.exists() {
            let text = fs::read_to_string(&candidate)?;
            toml::from_str(&text)?
        } else {
            Settings::default()
        };
        settings.apply_env();
        Ok(settings)
    }

    /// Environment overrides for deployment-varying knobs.
    fn apply_env(&mut self) {
        if let Ok(db) = std::env::var("JOBHOUND_DB") {
            self.database_path = PathBuf::from(db);
        }
        if let Ok(v) = std::env::var("JOBHOUND_SCRAPE_WORKERS") {
            if let Ok(n) = v.parse() {
                self.scrape_workers = n;
            }
        }
        if let Ok(v) = std::env::var("JOBHOUND_VALIDATION_WORKERS") {
            if let Ok(n) = v.parse() {
                self.validation_workers = n;
            }
        }
        if let Ok(endpoint) = std::env::var("JOBHOUND_AI_ENDPOINT") {
            let api_key = std::env::var("JOBHOUND_AI_KEY").ok();
            let model = std::env::var("JOBHOUND_AI_MODEL").unwrap_or_else(|_| default_ai_model());
            self.ai = Some(AiSettings {
                endpoint,
                api_key,
                model,
            });
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }

    pub fn dispatch_min_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_min_interval_ms)
    }

    /// Built-in sources used when the config file defines none.
    fn default_sources() -> Vec<SourceConfig> {
        vec![
            SourceConfig {
                id: "weworkremotely".to_string(),
                kind: SourceKind::Feed,
                endpoint: Some(
                    "https://weworkremotely.com/categories/{category}.rss".to_string(),
                ),
                categories: vec![
                    "remote-programming-jobs".to_string(),
                    "remote-devops-sysadmin-jobs".to_string(),
                    "remote-full-stack-programming-jobs".to_string(),
                    "remote-back-end-programming-jobs".to_string(),
                    "remote-front-end-programming-jobs".to_string(),
                ],
                urls: Vec::new(),
                fallback_url: None,
            },
            SourceConfig {
                id: "remoteok".to_string(),
                kind: SourceKind::Api,
                endpoint: Some("https://remoteok.com/api".to_string()),
                categories: Vec::new(),
                urls: Vec::new(),
                fallback_url: Some("https://remoteok.com/remote-dev-jobs".to_string()),
            },
            SourceConfig {
                id: "universal".to_string(),
                kind: SourceKind::Universal,
                endpoint: None,
                categories: Vec::new(),
                urls: Vec::new(),
                fallback_url: None,
            },
        ]
    }
}
