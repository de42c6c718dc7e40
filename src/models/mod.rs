//! Data models for Jobhound.

mod record;
mod task;

pub use record::{CleanupReport, ContentKind, JobRecord, ScrapeRunStats};
pub use task::{backoff_delay, ScrapeTask, TaskKind, TaskPayload, TaskStatus};
