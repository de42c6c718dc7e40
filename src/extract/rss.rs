//! RSS feed extraction.
//!
//! Streams feed XML with quick-xml and builds one record per `<item>`.
//! Feed titles of the form `"Company: Title"` are split; descriptions
//! are stripped of markup; a missing publish date defaults to now.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::extract::refine;
use crate::models::JobRecord;
use crate::utils::html::strip_tags;

/// Fields accumulated while inside one `<item>`.
#[derive(Debug, Default)]
struct PartialItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    pub_date: Option<String>,
    description: Option<String>,
}

impl PartialItem {
    fn set(&mut self, tag: &[u8], text: String) {
        let slot = match tag {
            b"title" => &mut self.title,
            b"link" => &mut self.link,
            b"guid" => &mut self.guid,
            b"pubDate" => &mut self.pub_date,
            b"description" => &mut self.description,
            _ => return,
        };
        // First occurrence wins; feeds sometimes repeat tags in extensions.
        if slot.is_none() && !text.trim().is_empty() {
            *slot = Some(text);
        }
    }

    fn into_record(self) -> Option<JobRecord> {
        let raw_title = self.title?;
        let url = self.link.or(self.guid)?;

        let (company, title) = split_company_title(&raw_title);
        let description = strip_tags(self.description.as_deref().unwrap_or(""));
        let posted_at = self
            .pub_date
            .as_deref()
            .and_then(parse_feed_date)
            .unwrap_or_else(Utc::now);

        let mut record = JobRecord::new(title, company, description, url);
        record.posted_at = Some(posted_at);
        let text = format!("{} {}", record.title, record.description);
        record.remote = refine::detect_remote(&text);
        record.job_type = refine::detect_job_type(&text);
        record.skills_required = refine::extract_skills(&record.description);
        Some(record)
    }
}

/// Split a `"Company: Title"` feed headline. Items without the pattern
/// get `"Unknown"` as the company.
fn split_company_title(raw: &str) -> (String, String) {
    match raw.split_once(": ") {
        Some((company, title)) if !company.trim().is_empty() && !title.trim().is_empty() => {
            (company.trim().to_string(), title.trim().to_string())
        }
        _ => ("Unknown".to_string(), raw.trim().to_string()),
    }
}

fn parse_feed_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse feed XML into records. Malformed XML past the last complete
/// item is ignored rather than failing the whole feed.
pub fn extract(xml: &str) -> Vec<JobRecord> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<PartialItem> = None;
    let mut open_tag: Vec<u8> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"item" || name == b"entry" {
                    current = Some(PartialItem::default());
                } else {
                    open_tag = name;
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(item), Ok(text)) = (current.as_mut(), t.unescape()) {
                    item.set(&open_tag, text.into_owned());
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(item) = current.as_mut() {
                    let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                    item.set(&open_tag, text);
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"item" || name == b"entry" {
                    if let Some(record) = current.take().and_then(PartialItem::into_record) {
                        records.push(record);
                    }
                }
                open_tag.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("feed parse stopped early: {}", e);
                break;
            }
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Jobs</title>
    <item>
      <title>Acme: Backend Engineer</title>
      <link>https://example.com/jobs/1</link>
      <pubDate>Mon, 10 Aug 2026 12:00:00 GMT</pubDate>
      <description><![CDATA[<p>Build <b>APIs</b> in rust and postgresql, full-time.</p>]]></description>
    </item>
    <item>
      <title>No colon title</title>
      <guid>https://example.com/jobs/2</guid>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn splits_company_prefix_and_defaults_unknown() {
        let records = extract(FEED);
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].company_name, "Acme");
        assert_eq!(records[0].title, "Backend Engineer");
        assert_eq!(records[0].source_url, "https://example.com/jobs/1");
        assert_eq!(
            records[0].description,
            "Build APIs in rust and postgresql, full-time."
        );
        assert!(records[0].skills_required.contains(&"rust".to_string()));

        assert_eq!(records[1].company_name, "Unknown");
        assert_eq!(records[1].title, "No colon title");
        assert_eq!(records[1].source_url, "https://example.com/jobs/2");
    }

    #[test]
    fn missing_pub_date_defaults_to_now() {
        let records = extract(FEED);
        let age = Utc::now() - records[1].posted_at.unwrap();
        assert!(age.num_seconds() < 60);
    }

    #[test]
    fn items_without_url_are_dropped() {
        let feed = r#"<rss><channel><item><title>Orphan</title></item></channel></rss>"#;
        assert!(extract(feed).is_empty());
    }
}
