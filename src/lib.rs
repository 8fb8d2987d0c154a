//! Resumable image downloader.
//!
//! Reads image variants from a scraped SQLite database, fetches each one at
//! most once across runs with bounded concurrency, and keeps a per-item
//! download log so interrupted runs pick up where they left off.

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod normalize;
pub mod output;
pub mod paths;
pub mod progress;
pub mod report;
pub mod source;
pub mod tracker;
pub mod worker;
