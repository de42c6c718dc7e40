//! Typed errors for the ingestion pipeline.
//!
//! Library layers use `thiserror` enums; the CLI boundary wraps them in
//! `anyhow` with context.

use thiserror::Error;

/// Errors surfaced by fetch/extract/persist operations.
///
/// An extraction that finds zero records is NOT an error: extractors
/// return an empty vec and the strategy chain falls through.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Network, navigation, or non-2xx response. Retryable.
    #[error("fetch failed for {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    /// Browser launch/session failure.
    #[error("browser error: {0}")]
    Browser(String),

    /// AI fallback produced unparseable or non-conforming output.
    /// Terminal for that URL; retrying will not fix a content problem.
    #[error("extraction produced invalid output: {0}")]
    ExtractionInvalid(String),

    /// Record store failure.
    #[error("persistence failed: {0}")]
    Persistence(#[from] crate::store::StoreError),

    /// Task queue failure.
    #[error("queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    /// Source id with no registered scraper.
    #[error("unknown source: {0}")]
    UnknownSource(String),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;

impl ScrapeError {
    /// Build a `FetchFailed` from any displayable cause.
    pub fn fetch(url: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::FetchFailed {
            url: url.into(),
            reason: cause.to_string(),
        }
    }
}
