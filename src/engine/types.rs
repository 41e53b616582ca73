//! Engine types
//!
//! Run options and the summary returned by a sync.

use crate::config::ExporterConfig;
use crate::types::SyncMode;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Options for one sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Full refresh or incremental
    pub mode: SyncMode,
    /// Lower bound for incremental feeds, applied even without a watermark
    pub modified_after: Option<DateTime<Utc>>,
    /// Feed allow-list, empty means every feed
    pub tables: Vec<String>,
    /// Directory created before any feed runs
    pub export_path: PathBuf,
    /// Concurrent media downloads
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::Incremental,
            modified_after: None,
            tables: Vec::new(),
            export_path: PathBuf::from("./export/"),
            concurrency: 10,
        }
    }
}

impl SyncOptions {
    /// Options resolved from the exporter configuration
    pub fn from_config(config: &ExporterConfig) -> Self {
        Self {
            mode: SyncMode::from_incremental(config.export.incremental),
            modified_after: config.modified_after(),
            tables: config.export.tables.clone(),
            export_path: config.export.path.clone(),
            concurrency: config.concurrency.max(1),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = tables;
        self
    }

    #[must_use]
    pub fn with_export_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = path.into();
        self
    }

    #[must_use]
    pub fn with_modified_after(mut self, after: Option<DateTime<Utc>>) -> Self {
        self.modified_after = after;
        self
    }
}

/// Outcome of one feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedResult {
    pub feed: &'static str,
    pub rows_written: usize,
    pub pages: usize,
    /// Local rows flagged as deleted remotely
    pub rows_deleted: usize,
    pub media_downloaded: usize,
}

impl FeedResult {
    pub fn new(feed: &'static str) -> Self {
        Self {
            feed,
            rows_written: 0,
            pages: 0,
            rows_deleted: 0,
            media_downloaded: 0,
        }
    }
}

/// Summary of a sync run
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Feeds that drained completely, in run order
    pub completed: Vec<FeedResult>,
    /// Feeds skipped because access was denied
    pub skipped: Vec<&'static str>,
    pub rows_written: usize,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn add_completed(&mut self, result: FeedResult) {
        self.rows_written += result.rows_written;
        self.completed.push(result);
    }

    pub fn add_skipped(&mut self, feed: &'static str) {
        self.skipped.push(feed);
    }

    pub fn completed_names(&self) -> Vec<&'static str> {
        self.completed.iter().map(|r| r.feed).collect()
    }

    /// Result for a completed feed
    pub fn feed(&self, name: &str) -> Option<&FeedResult> {
        self.completed.iter().find(|r| r.feed == name)
    }
}
