//! CSV file sink
//!
//! Rows are staged in a DuckDB file inside the export directory, keyed the
//! same way as a SQL table, and copied out to CSV when a feed finishes.
//! Staging keeps incremental runs working: the CSV files are rebuilt from
//! every row seen so far, not just this run's.

use super::media::write_media_file;
use super::store::DuckStore;
use super::{InitFeedOptions, StorageSink};
use crate::error::{Result, ResultExt};
use crate::feed::{Cell, FeedDescriptor, Row};
use crate::types::Dialect;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, Span};

/// Staging database inside the export directory
pub const STAGING_FILE: &str = "staging.duckdb";

/// File names for a table of `rows` rows split at `max_rows_per_file`
///
/// A table that fits in one file is `{feed}.csv`; a larger one becomes
/// `{feed}-00001.csv`, `{feed}-00002.csv`, ... so the names sort in row
/// order.
pub fn csv_file_names(feed: &str, rows: usize, max_rows_per_file: usize) -> Vec<String> {
    let max = max_rows_per_file.max(1);
    if rows <= max {
        return vec![format!("{feed}.csv")];
    }
    (1..=rows.div_ceil(max))
        .map(|n| format!("{feed}-{n:05}.csv"))
        .collect()
}

fn is_feed_file(feed: &str, file_name: &str) -> bool {
    let Some(stem) = file_name.strip_suffix(".csv") else {
        return false;
    };
    if stem == feed {
        return true;
    }
    stem.strip_prefix(feed)
        .and_then(|rest| rest.strip_prefix('-'))
        .is_some_and(|n| n.len() == 5 && n.chars().all(|c| c.is_ascii_digit()))
}

/// Writes one or more CSV files per feed
#[derive(Debug)]
pub struct CsvSink {
    store: DuckStore,
    export_path: PathBuf,
    media_path: PathBuf,
    max_rows_per_file: usize,
    span: Span,
}

impl CsvSink {
    /// Open the sink, creating the export directory and its staging file
    pub fn open(
        export_path: impl Into<PathBuf>,
        media_path: impl Into<PathBuf>,
        max_rows_per_file: usize,
    ) -> Result<Self> {
        let export_path = export_path.into();
        std::fs::create_dir_all(&export_path)
            .with_context(|| format!("create export directory {}", export_path.display()))?;
        let store = DuckStore::open_file(&export_path.join(STAGING_FILE))?;

        Ok(Self {
            store,
            export_path,
            media_path: media_path.into(),
            max_rows_per_file: max_rows_per_file.max(1),
            span: Span::none(),
        })
    }

    /// Parent log events on `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn export_path(&self) -> &Path {
        &self.export_path
    }

    /// Remove CSV files left by an earlier run of the feed
    fn remove_previous(&self, feed: &str) -> Result<()> {
        for entry in std::fs::read_dir(&self.export_path)? {
            let entry = entry?;
            let name = entry.file_name();
            if is_feed_file(feed, &name.to_string_lossy()) {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageSink for CsvSink {
    fn kind(&self) -> &'static str {
        "csv"
    }

    fn supports_upsert(&self) -> bool {
        false
    }

    fn parameter_limit(&self) -> usize {
        Dialect::Duckdb.parameter_limit()
    }

    async fn init_feed(&self, feed: &FeedDescriptor, options: InitFeedOptions) -> Result<()> {
        self.store.ensure_table(feed)?;
        if options.truncate {
            self.store.truncate(feed)?;
            self.store.clear_watermarks(feed.name)?;
        }
        Ok(())
    }

    /// Header-only CSV file
    async fn create_schema(&self, feed: &FeedDescriptor) -> Result<()> {
        self.store.ensure_table(feed)?;
        self.remove_previous(feed.name)?;
        let path = self.export_path.join(format!("{}.csv", feed.name));
        self.store.copy_csv(feed, &path, 0, 0)
    }

    async fn write_rows(&self, feed: &FeedDescriptor, rows: &[Row]) -> Result<usize> {
        self.store.write(feed, rows, self.parameter_limit())
    }

    async fn delete_rows(
        &self,
        feed: &FeedDescriptor,
        column: &str,
        values: &[String],
    ) -> Result<usize> {
        self.store.delete_in(feed, column, values)
    }

    async fn update_rows(
        &self,
        feed: &FeedDescriptor,
        keys: &[String],
        column: &str,
        value: Cell,
    ) -> Result<usize> {
        self.store.update_in(feed, keys, column, &value)
    }

    async fn last_modified_at(
        &self,
        feed: &FeedDescriptor,
        floor: DateTime<Utc>,
        org_id: &str,
    ) -> Result<DateTime<Utc>> {
        let stored = self.store.watermark(feed.name, org_id)?;
        Ok(stored.map_or(floor, |ts| ts.max(floor)))
    }

    async fn advance_watermark(
        &self,
        feed: &FeedDescriptor,
        org_id: &str,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        self.store.advance_watermark(feed.name, org_id, ts)
    }

    /// Rewrite the feed's CSV files from the staged table
    async fn finalise_export(&self, feed: &FeedDescriptor) -> Result<()> {
        self.remove_previous(feed.name)?;

        let rows = self.store.count(feed)?;
        let files = csv_file_names(feed.name, rows, self.max_rows_per_file);
        for (i, name) in files.iter().enumerate() {
            let path = self.export_path.join(name);
            self.store.copy_csv(
                feed,
                &path,
                self.max_rows_per_file,
                i * self.max_rows_per_file,
            )?;
        }

        info!(parent: &self.span, feed = feed.name, rows, files = files.len(), "csv export complete");
        Ok(())
    }

    async fn write_media(
        &self,
        audit_id: &str,
        media_id: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<()> {
        write_media_file(&self.media_path, audit_id, media_id, content_type, body).await?;
        Ok(())
    }
}
