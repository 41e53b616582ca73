//! SQL database sink

use super::media::write_media_file;
use super::store::DuckStore;
use super::{InitFeedOptions, StorageSink};
use crate::config::DbConfig;
use crate::error::Result;
use crate::feed::{Cell, FeedDescriptor, Row};
use crate::types::Dialect;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, Span};

/// Keys bound per `IN (..)` statement
const KEY_CHUNK: usize = 1000;

/// Writes one table per feed into a relational database
#[derive(Debug)]
pub struct SqlSink {
    store: DuckStore,
    dialect: Dialect,
    media_path: PathBuf,
    span: Span,
}

impl SqlSink {
    /// Connect to the configured database
    pub fn connect(config: &DbConfig, media_path: impl Into<PathBuf>) -> Result<Self> {
        let store = DuckStore::open(config.dialect, &config.connection_string, config.auto_migrate)?;
        Ok(Self {
            store,
            dialect: config.dialect,
            media_path: media_path.into(),
            span: Span::none(),
        })
    }

    /// Parent log events on `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Underlying store, for queries outside the sink contract
    pub fn store(&self) -> &DuckStore {
        &self.store
    }
}

#[async_trait]
impl StorageSink for SqlSink {
    fn kind(&self) -> &'static str {
        "sql"
    }

    fn supports_upsert(&self) -> bool {
        true
    }

    fn parameter_limit(&self) -> usize {
        self.dialect.parameter_limit()
    }

    async fn init_feed(&self, feed: &FeedDescriptor, options: InitFeedOptions) -> Result<()> {
        self.store.ensure_table(feed)?;
        if options.truncate {
            debug!(parent: &self.span, feed = feed.name, "truncating table");
            self.store.truncate(feed)?;
            if self.store.migrates() {
                self.store.clear_watermarks(feed.name)?;
            }
        }
        Ok(())
    }

    async fn create_schema(&self, feed: &FeedDescriptor) -> Result<()> {
        self.store.ensure_table(feed)
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
        let mut deleted = 0;
        for chunk in values.chunks(KEY_CHUNK) {
            deleted += self.store.delete_in(feed, column, chunk)?;
        }
        Ok(deleted)
    }

    async fn update_rows(
        &self,
        feed: &FeedDescriptor,
        keys: &[String],
        column: &str,
        value: Cell,
    ) -> Result<usize> {
        let mut updated = 0;
        for chunk in keys.chunks(KEY_CHUNK) {
            updated += self.store.update_in(feed, chunk, column, &value)?;
        }
        Ok(updated)
    }

    /// Without migrations there is no watermark table, so the latest
    /// modification time already stored for the organisation is used
    async fn last_modified_at(
        &self,
        feed: &FeedDescriptor,
        floor: DateTime<Utc>,
        org_id: &str,
    ) -> Result<DateTime<Utc>> {
        let stored = if self.store.migrates() {
            self.store.watermark(feed.name, org_id)?
        } else {
            self.store.column_max(feed, org_id)?
        };
        Ok(stored.map_or(floor, |ts| ts.max(floor)))
    }

    async fn advance_watermark(
        &self,
        feed: &FeedDescriptor,
        org_id: &str,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        if !self.store.migrates() {
            return Ok(());
        }
        self.store.advance_watermark(feed.name, org_id, ts)
    }

    async fn finalise_export(&self, feed: &FeedDescriptor) -> Result<()> {
        debug!(parent: &self.span, feed = feed.name, rows = self.store.count(feed)?, "table complete");
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
