//! Jobhound - job posting ingestion and maintenance pipeline.
//!
//! Scrapes postings from configured sources (feeds, JSON APIs, and
//! arbitrary pages), persists them deduplicated by URL, and keeps the
//! store healthy with scheduled validation and cleanup, all driven by
//! a persistent SQLite task queue.

pub mod browser;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod utils;
pub mod workers;
