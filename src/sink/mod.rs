//! Storage sinks
//!
//! A sink is where feed rows end up. Every backend implements
//! [`StorageSink`]; the orchestrator picks one at startup from the command
//! and never inspects which one it holds.
//!
//! | Sink | Rows | Watermark |
//! |------|------|-----------|
//! | [`SqlSink`] | one table per feed, upserted | `_sync_watermarks` table |
//! | [`CsvSink`] | staged in DuckDB, copied to rotated CSV files | `_sync_watermarks` table |
//! | [`JsonSink`] | one file per record | `last-modified` sidecar file |

mod csv;
mod json;
mod media;
mod sql;
mod store;

pub use csv::{csv_file_names, CsvSink};
pub use json::{JsonSink, LastModifiedMarker};
pub use media::{media_extension, media_path};
pub use sql::SqlSink;
pub use store::{create_table_sql, quote, upsert_sql, DuckStore, WriteMode, WATERMARK_TABLE};

use crate::error::Result;
use crate::feed::{Cell, FeedDescriptor, Row};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Options for [`StorageSink::init_feed`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitFeedOptions {
    /// Clear the feed's rows and watermark
    pub truncate: bool,
}

/// Contract between the orchestrator and a storage backend
#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Short backend name for logs
    fn kind(&self) -> &'static str;

    /// Whether rows with an existing key are updated in place
    fn supports_upsert(&self) -> bool;

    /// Placeholders one statement may carry
    fn parameter_limit(&self) -> usize;

    /// Ensure the feed's storage exists, truncating it when asked
    async fn init_feed(&self, feed: &FeedDescriptor, options: InitFeedOptions) -> Result<()>;

    /// Create the feed's storage with no rows
    async fn create_schema(&self, feed: &FeedDescriptor) -> Result<()>;

    /// Write rows by primary key, returning how many were written
    async fn write_rows(&self, feed: &FeedDescriptor, rows: &[Row]) -> Result<usize>;

    /// Delete rows whose `column` is one of `values`
    async fn delete_rows(&self, feed: &FeedDescriptor, column: &str, values: &[String])
        -> Result<usize>;

    /// Set `column` to `value` on the rows with the given primary keys
    async fn update_rows(
        &self,
        feed: &FeedDescriptor,
        keys: &[String],
        column: &str,
        value: Cell,
    ) -> Result<usize>;

    /// `max(floor, stored watermark)` for the feed and organisation
    async fn last_modified_at(
        &self,
        feed: &FeedDescriptor,
        floor: DateTime<Utc>,
        org_id: &str,
    ) -> Result<DateTime<Utc>>;

    /// Record that the feed is complete up to `ts`; never moves backwards
    async fn advance_watermark(
        &self,
        feed: &FeedDescriptor,
        org_id: &str,
        ts: DateTime<Utc>,
    ) -> Result<()>;

    /// Flush buffered output for the feed
    async fn finalise_export(&self, feed: &FeedDescriptor) -> Result<()>;

    /// Persist one media attachment of an inspection
    async fn write_media(
        &self,
        audit_id: &str,
        media_id: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<()>;
}

#[cfg(test)]
mod tests;
