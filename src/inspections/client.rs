//! Inspection client

use crate::config::ExporterConfig;
use crate::error::{Error, Result, ResultExt};
use crate::feed::parse_timestamp;
use crate::http::{HttpClient, RequestConfig};
use crate::pagination::{FeedRequest, ModifiedAfterPaginator, Pager};
use crate::sink::{JsonSink, LastModifiedMarker};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, Span};

/// Inspection search endpoint
pub const SEARCH_PATH: &str = "/audits/search";

#[derive(Debug, Deserialize)]
struct SearchEntry {
    audit_id: String,
    #[serde(default)]
    modified_at: String,
}

/// What to export
#[derive(Debug, Clone)]
pub struct InspectionExportOptions {
    pub incremental: bool,
    pub modified_after: Option<DateTime<Utc>>,
    pub template_ids: Vec<String>,
    pub archived: String,
    pub completed: String,
    pub skip_ids: HashSet<String>,
    pub concurrency: usize,
}

impl InspectionExportOptions {
    pub fn from_config(config: &ExporterConfig) -> Self {
        let inspection = &config.export.inspection;
        Self {
            incremental: config.export.incremental,
            modified_after: config.modified_after(),
            template_ids: config.export.template_ids.clone(),
            archived: inspection.archived.clone(),
            completed: inspection.completed.clone(),
            skip_ids: inspection.skip_ids.iter().cloned().collect(),
            concurrency: config.concurrency.max(1),
        }
    }
}

/// Summary of an inspection export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectionExportReport {
    pub exported: usize,
    pub skipped: usize,
    pub pages: usize,
}

/// Exports whole inspections as JSON documents
#[derive(Debug)]
pub struct InspectionClient {
    client: HttpClient,
    sink: Arc<JsonSink>,
    options: InspectionExportOptions,
    span: Span,
}

impl InspectionClient {
    pub fn new(client: HttpClient, sink: Arc<JsonSink>, options: InspectionExportOptions) -> Self {
        Self {
            client,
            sink,
            options,
            span: Span::none(),
        }
    }

    /// Parent log events on `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Marker kept in the export directory
    pub fn marker(&self) -> LastModifiedMarker {
        LastModifiedMarker::new(self.sink.root())
    }

    /// Search request starting after `after`
    pub fn search_request(&self, after: Option<DateTime<Utc>>) -> FeedRequest {
        FeedRequest::new(SEARCH_PATH)
            .param("field", "audit_id")
            .param("field", "modified_at")
            .modified_after(after)
            .repeated("template", &self.options.template_ids)
            .param_if_set("archived", &self.options.archived)
            .param_if_set("completed", &self.options.completed)
    }

    /// Export every inspection modified since the resume point
    pub async fn export(&self) -> Result<InspectionExportReport> {
        let marker = self.marker();
        let floor = self.options.modified_after.unwrap_or(DateTime::UNIX_EPOCH);
        let start = if self.options.incremental {
            marker.resolve(floor).await?
        } else {
            floor
        };
        info!(parent: &self.span, since = %start.to_rfc2822(), "exporting inspections");

        let request = self.search_request((start > DateTime::UNIX_EPOCH).then_some(start));
        let mut pager = Pager::new(&self.client, request, ModifiedAfterPaginator::default());
        let permits = Arc::new(Semaphore::new(self.options.concurrency));
        let mut report = InspectionExportReport::default();

        while let Some(page) = pager.next_page().await.context("failed to list inspections")? {
            let entries: Vec<SearchEntry> = page
                .records
                .into_iter()
                .map(serde_json::from_value)
                .collect::<std::result::Result<_, _>>()?;

            let mut tasks = JoinSet::new();
            for entry in &entries {
                if self.options.skip_ids.contains(&entry.audit_id) {
                    report.skipped += 1;
                    continue;
                }
                let permit = Arc::clone(&permits)
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Other(e.to_string()))?;
                let (client, sink, id) = (self.client.clone(), Arc::clone(&self.sink), entry.audit_id.clone());
                tasks.spawn(async move {
                    let result = fetch_and_write(&client, &sink, &id).await;
                    drop(permit);
                    result.with_context(|| format!("Failed to get inspection with id: {id}"))
                });
            }

            while let Some(joined) = tasks.join_next().await {
                joined.map_err(|e| Error::Other(format!("inspection task failed: {e}")))??;
                report.exported += 1;
            }

            // Page order, not completion order, decides the resume point
            if let Some(last) = entries.last().and_then(|e| parse_timestamp(&e.modified_at)) {
                marker.advance(last).await?;
            }
            report.pages = page.number;
        }

        info!(
            parent: &self.span,
            exported = report.exported,
            skipped = report.skipped,
            "inspection export finished"
        );
        Ok(report)
    }
}

async fn fetch_and_write(client: &HttpClient, sink: &JsonSink, audit_id: &str) -> Result<()> {
    let inspection: Value = client
        .get_json(&format!("audits/{audit_id}"), RequestConfig::new())
        .await?;
    sink.write_document(audit_id, &inspection).await?;
    Ok(())
}
