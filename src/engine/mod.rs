//! Sync orchestrator
//!
//! Drives every selected feed through the pagination driver into a
//! storage sink.
//!
//! # Overview
//!
//! Feeds run one at a time, in dependency order. For each feed the engine:
//!
//! 1. initialises the sink's table, truncating it when the feed's policy
//!    asks for a full replay
//! 2. resolves the lower bound: the stored watermark or the configured
//!    `modified_after`, whichever is later
//! 3. drains the feed page by page, mapping and writing each page
//! 4. flags inspections deleted since the lower bound
//! 5. finalises the sink's output and only then advances the watermark
//!
//! A feed that answers 403 is skipped. Any other error is wrapped with the
//! feed name and ends the run.

mod media;
mod reconcile;
mod types;

pub use media::{media_id, media_refs, MediaDownloader, MediaRef};
pub use reconcile::{
    audit_id, DeletionReconciler, ReconcileState, ACTIVITY_LOG_PATH, INSPECTION_DELETED,
};
pub use types::{FeedResult, SyncOptions, SyncReport};

use crate::config::ExporterConfig;
use crate::error::{Error, EventError, Result, ResultExt, Severity, Subsystem};
use crate::feed::{
    catalog, dependency_order, map_records, select, Cell, FeedDescriptor, ScopedDelete,
};
use crate::http::HttpClient;
use crate::logging;
use crate::pagination::{NextPageUrlPaginator, Pager};
use crate::sink::{InitFeedOptions, StorageSink};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn, Instrument, Span};

/// Column flagged on inspections deleted remotely
const DELETED_COLUMN: &str = "deleted";

/// Sync engine for exporting feeds into a sink
pub struct SyncEngine {
    client: HttpClient,
    sink: Arc<dyn StorageSink>,
    feeds: Vec<FeedDescriptor>,
    options: SyncOptions,
    span: Span,
}

impl SyncEngine {
    /// Engine over the full feed catalog
    pub fn new(client: HttpClient, sink: Arc<dyn StorageSink>, config: &ExporterConfig) -> Self {
        Self {
            client,
            sink,
            feeds: catalog(config),
            options: SyncOptions::from_config(config),
            span: logging::component_span("sync"),
        }
    }

    /// Replace the feed catalog
    #[must_use]
    pub fn with_feeds(mut self, feeds: Vec<FeedDescriptor>) -> Self {
        self.feeds = feeds;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Parent log events on `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Selected feeds in the order they run
    pub fn planned_feeds(&self) -> Result<Vec<FeedDescriptor>> {
        let selected = select(self.feeds.clone(), &self.options.tables);
        if selected.is_empty() {
            return Err(Error::config("no tables selected"));
        }
        dependency_order(selected)
    }

    /// Export every selected feed
    pub async fn export_feeds(&self) -> Result<SyncReport> {
        let start = Instant::now();
        let feeds = self.planned_feeds()?;

        tokio::fs::create_dir_all(&self.options.export_path)
            .await
            .with_context(|| {
                format!(
                    "create export directory {}",
                    self.options.export_path.display()
                )
            })?;

        let who = self.client.who_am_i().await.context("identify organisation")?;
        let org_id = who.organisation_id;
        info!(
            parent: &self.span,
            sink = self.sink.kind(),
            feeds = feeds.len(),
            mode = ?self.options.mode,
            org_id = %org_id,
            "starting export"
        );

        let mut report = SyncReport::default();
        for feed in &feeds {
            let span = logging::feed_span(&self.span, feed.name, &org_id);
            match self.sync_feed(feed, &org_id, &span).instrument(span.clone()).await {
                Ok(result) => report.add_completed(result),
                Err(e) if e.is_forbidden() && !e.is_fatal() => {
                    warn!(parent: &span, error = %e, "access denied, skipping feed");
                    report.add_skipped(feed.name);
                }
                Err(e) => return Err(Error::feed(feed.name, e)),
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            parent: &self.span,
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            rows = report.rows_written,
            duration_ms = report.duration_ms,
            "export complete"
        );
        Ok(report)
    }

    /// Create each selected feed's table or file with no rows
    pub async fn export_schema(&self) -> Result<usize> {
        let feeds = self.planned_feeds()?;
        tokio::fs::create_dir_all(&self.options.export_path)
            .await
            .with_context(|| {
                format!(
                    "create export directory {}",
                    self.options.export_path.display()
                )
            })?;

        for feed in &feeds {
            self.sink
                .create_schema(feed)
                .await
                .map_err(|e| Error::feed(feed.name, e))?;
        }
        info!(parent: &self.span, feeds = feeds.len(), "schema created");
        Ok(feeds.len())
    }

    async fn sync_feed(
        &self,
        feed: &FeedDescriptor,
        org_id: &str,
        span: &Span,
    ) -> Result<FeedResult> {
        let mode = self.options.mode;
        let truncate = feed.truncate_before_sync(mode, self.sink.supports_upsert());
        self.sink
            .init_feed(feed, InitFeedOptions { truncate })
            .await
            .event(Subsystem::Db, "cannot initialise table")?;

        let floor = self
            .options
            .modified_after
            .unwrap_or(DateTime::UNIX_EPOCH);
        let lower_bound = if feed.incremental {
            self.sink.last_modified_at(feed, floor, org_id).await?
        } else {
            floor
        };
        let after = (lower_bound > DateTime::UNIX_EPOCH).then_some(lower_bound);

        if feed.scoped_delete == ScopedDelete::Organisation {
            self.sink
                .delete_rows(feed, "organisation_id", &[org_id.to_string()])
                .await
                .event(Subsystem::Db, "cannot clear organisation rows")?;
        }

        let mut request = feed.request.clone();
        if feed.incremental {
            request = request.modified_after(after);
        }

        let media = feed.media.then(|| {
            MediaDownloader::new(
                self.client.clone(),
                Arc::clone(&self.sink),
                self.options.concurrency,
            )
            .with_span(span.clone())
        });

        let exported_at = Utc::now();
        let mut result = FeedResult::new(feed.name);
        let mut max_modified: Option<DateTime<Utc>> = None;
        let mut cleared_parents: HashSet<String> = HashSet::new();
        let mut pager = Pager::new(&self.client, request, NextPageUrlPaginator);

        while let Some(page) = pager.next_page().await? {
            let mapped = map_records(feed, &page.records, exported_at)?;

            if let ScopedDelete::Parent(column) = feed.scoped_delete {
                let parents = parent_values(feed, column, &mapped.rows, &mut cleared_parents);
                self.sink
                    .delete_rows(feed, column, &parents)
                    .await
                    .event(Subsystem::Db, "cannot clear child rows")?;
            }

            let written = self
                .sink
                .write_rows(feed, &mapped.rows)
                .await
                .event(Subsystem::Db, "cannot write rows")?;

            if let Some(downloader) = &media {
                result.media_downloaded += downloader.download_all(media_refs(feed, &mapped.rows)).await;
            }

            max_modified = max_modified.max(mapped.max_modified);
            result.rows_written += written;
            result.pages = page.number;
            info!(
                parent: span,
                page = page.number,
                rows = written,
                skipped = mapped.skipped,
                estimated_remaining = page.remaining.unwrap_or_default(),
                "export batch complete"
            );
        }

        if feed.reconcile_deletions && mode.is_incremental() {
            if let Some(since) = after {
                result.rows_deleted = self.reconcile(feed, org_id, since, span).await?;
            }
        }

        self.sink
            .finalise_export(feed)
            .await
            .event(Subsystem::FileOperations, "cannot finalise export")?;

        if feed.incremental {
            let watermark = max_modified.map_or(lower_bound, |m| m.max(lower_bound));
            if watermark > DateTime::UNIX_EPOCH {
                self.sink.advance_watermark(feed, org_id, watermark).await?;
            }
        }

        Ok(result)
    }

    /// Flag rows for inspections deleted since `since`
    async fn reconcile(
        &self,
        feed: &FeedDescriptor,
        org_id: &str,
        since: DateTime<Utc>,
        span: &Span,
    ) -> Result<usize> {
        let deleted = DeletionReconciler::new(&self.client, org_id)
            .with_span(span.clone())
            .deleted_since(since)
            .await
            .map_err(|e| {
                Error::Event(
                    EventError::new(e, Severity::Error, Subsystem::Api, true)
                        .with_message("cannot reconcile deleted inspections"),
                )
            })?;
        if deleted.is_empty() {
            return Ok(0);
        }

        let flagged = self
            .sink
            .update_rows(feed, &deleted, DELETED_COLUMN, Cell::Bool(true))
            .await
            .event(Subsystem::Db, "cannot flag deleted inspections")?;
        info!(parent: span, deleted = deleted.len(), flagged, "deleted inspections reconciled");
        Ok(flagged)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("sink", &self.sink.kind())
            .field("feeds", &self.feeds.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Parent ids in `rows` not yet cleared during this drain
fn parent_values(
    feed: &FeedDescriptor,
    column: &str,
    rows: &[crate::feed::Row],
    cleared: &mut HashSet<String>,
) -> Vec<String> {
    let Some(index) = feed.column_index(column) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| row[index].as_str())
        .filter(|id| cleared.insert((*id).to_string()))
        .map(str::to_string)
        .collect()
}
