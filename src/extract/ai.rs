//! AI fallback extraction.
//!
//! Last-resort strategy for HTML pages that carry no structured data.
//! The model is only ever asked to transcribe what is already on the
//! page; any posting whose title or company cannot be found verbatim
//! in the page text is discarded.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::AiSettings;
use crate::error::{Result, ScrapeError};
use crate::extract::refine;
use crate::models::JobRecord;
use crate::utils::html::{strip_tags, truncate_chars};

/// Page text is capped before prompting to keep requests bounded.
const MAX_PAGE_CHARS: usize = 12_000;

const SYSTEM_PROMPT: &str = "You are a job posting transcriber. You copy job postings \
    verbatim from page text into JSON. You never invent, guess, or embellish any field. \
    If a field is not present in the text, omit it. If the page contains no job postings, \
    return an empty array.";

/// Pluggable text generation backend, swapped for a canned one in tests.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, user: &str) -> Result<String>;
}

/// OpenAI-compatible chat completions backend.
pub struct HttpTextGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpTextGenerator {
    pub fn new(settings: &AiSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            model: settings.model.clone(),
        }
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        let request = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.0,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| ScrapeError::ExtractionInvalid(format!("ai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ScrapeError::ExtractionInvalid(format!(
                "ai endpoint returned {status}: {body}"
            )));
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Message {
            content: String,
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ScrapeError::ExtractionInvalid(format!("ai response malformed: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ScrapeError::ExtractionInvalid("ai returned no choices".into()))
    }
}

/// Shape the model is required to emit. Unknown fields are rejected so
/// a drifting response fails loudly instead of half-parsing.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AiPosting {
    title: String,
    company: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    remote: Option<bool>,
    #[serde(default)]
    job_type: Option<String>,
    #[serde(default)]
    salary_min: Option<i64>,
    #[serde(default)]
    salary_max: Option<i64>,
    #[serde(default)]
    url: Option<String>,
}

pub struct AiFallbackExtractor {
    generator: Box<dyn TextGenerator>,
}

impl AiFallbackExtractor {
    pub fn new(generator: Box<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub fn from_settings(settings: &AiSettings) -> Self {
        Self::new(Box::new(HttpTextGenerator::new(settings)))
    }

    /// Ask the model to transcribe postings from the page. Any failure
    /// (transport, decode, validation) yields an empty list so callers
    /// degrade to a no-result scrape instead of erroring out.
    pub async fn extract(&self, html: &str, url: &str) -> Vec<JobRecord> {
        let page_text = truncate_chars(&strip_tags(html), MAX_PAGE_CHARS);
        if page_text.trim().is_empty() {
            return Vec::new();
        }

        let user = format!(
            "Transcribe every job posting from this page text into a JSON object \
             {{\"postings\": [...]}}. Each posting has fields: title, company, description, \
             location, remote (boolean), job_type, salary_min, salary_max, url. \
             Copy values exactly as they appear. Omit any field not present.\n\n\
             Page URL: {url}\n\nPage text:\n{page_text}"
        );

        let raw = match self.generator.generate(SYSTEM_PROMPT, &user).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("ai extraction failed for {}: {}", url, e);
                return Vec::new();
            }
        };

        let postings = match decode_postings(&raw) {
            Ok(p) => p,
            Err(e) => {
                warn!("ai extraction for {} returned undecodable output: {}", url, e);
                return Vec::new();
            }
        };

        let total = postings.len();
        let records: Vec<JobRecord> = postings
            .into_iter()
            .filter_map(|p| validate_posting(p, &page_text, url))
            .collect();
        if records.len() < total {
            debug!(
                "dropped {} of {} ai postings from {} as unverifiable",
                total - records.len(),
                total,
                url
            );
        }
        records
    }
}

/// The response must be `{"postings": [...]}` or a bare array. Models
/// that wrap output in markdown fences still get a fair read.
fn decode_postings(raw: &str) -> std::result::Result<Vec<AiPosting>, serde_json::Error> {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    #[derive(Deserialize)]
    struct Wrapper {
        postings: Vec<AiPosting>,
    }
    match serde_json::from_str::<Wrapper>(trimmed) {
        Ok(w) => Ok(w.postings),
        Err(_) => serde_json::from_str::<Vec<AiPosting>>(trimmed),
    }
}

/// A posting survives only if its title and company both appear in the
/// page text and the title passes the junk filter.
fn validate_posting(posting: AiPosting, page_text: &str, page_url: &str) -> Option<JobRecord> {
    let title = posting.title.trim();
    let company = posting.company.trim();
    if title.is_empty() || company.is_empty() || refine::is_junk_title(title) {
        return None;
    }
    let haystack = page_text.to_lowercase();
    if !haystack.contains(&title.to_lowercase()) || !haystack.contains(&company.to_lowercase()) {
        return None;
    }

    let mut record = JobRecord::new(
        title,
        company,
        posting.description.unwrap_or_default(),
        posting.url.unwrap_or_else(|| page_url.to_string()),
    );
    record.location = posting.location.filter(|s| !s.trim().is_empty());
    record.remote = posting.remote.unwrap_or_else(|| {
        refine::detect_remote(&format!("{} {}", record.title, record.description))
    });
    record.job_type = posting.job_type.map(|s| s.to_lowercase()).or_else(|| {
        refine::detect_job_type(&format!("{} {}", record.title, record.description))
    });
    record.salary_min = posting.salary_min;
    record.salary_max = posting.salary_max;
    record.skills_required = refine::extract_skills(&record.description);
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedGenerator(String);

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn page() -> &'static str {
        "<html><body><h1>Careers at Initech</h1>\
         <div>Data Engineer - build pipelines with python and sql</div>\
         </body></html>"
    }

    #[tokio::test]
    async fn keeps_postings_grounded_in_page_text() {
        let canned = r#"{"postings": [
            {"title": "Data Engineer", "company": "Initech",
             "description": "build pipelines with python and sql"},
            {"title": "Imaginary CTO", "company": "Initech"}
        ]}"#;
        let extractor = AiFallbackExtractor::new(Box::new(CannedGenerator(canned.into())));
        let records = extractor.extract(page(), "https://initech.example.com/jobs").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Data Engineer");
        assert!(records[0].skills_required.contains(&"python".to_string()));
    }

    #[tokio::test]
    async fn malformed_output_yields_empty() {
        let extractor =
            AiFallbackExtractor::new(Box::new(CannedGenerator("sorry, I cannot".into())));
        let records = extractor.extract(page(), "https://initech.example.com/jobs").await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn unknown_fields_are_rejected() {
        let canned = r#"{"postings": [
            {"title": "Data Engineer", "company": "Initech", "confidence": 0.9}
        ]}"#;
        let extractor = AiFallbackExtractor::new(Box::new(CannedGenerator(canned.into())));
        let records = extractor.extract(page(), "https://initech.example.com/jobs").await;
        assert!(records.is_empty());
    }

    #[test]
    fn decode_accepts_fenced_and_bare_arrays() {
        let fenced = "```json\n{\"postings\": []}\n```";
        assert!(decode_postings(fenced).unwrap().is_empty());
        let bare = r#"[{"title": "X", "company": "Y"}]"#;
        assert_eq!(decode_postings(bare).unwrap().len(), 1);
    }
}
