//! Deletion reconciler
//!
//! Deleted inspections never show up in the inspections feed again, so
//! they are found in the organisation's activity log instead.

use crate::error::Result;
use crate::http::HttpClient;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, Span};

/// Activity log endpoint
pub const ACTIVITY_LOG_PATH: &str = "accounts/history/v1/activity_log/list";

/// Event type for a deleted inspection
pub const INSPECTION_DELETED: &str = "inspection.deleted";

const PAGE_SIZE: u32 = 100;

#[derive(Debug, Default, Deserialize)]
struct ActivityPage {
    #[serde(default)]
    activities: Vec<Activity>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Activity {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Progress through the activity log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileState {
    Start,
    /// Next page to request; `None` is the first page
    Fetching { page_token: Option<String> },
    Done,
}

/// Table key of an inspection id from the activity log
///
/// The log carries bare UUIDs; inspection rows are keyed
/// `audit_<uuid without dashes>`.
pub fn audit_id(inspection_id: &str) -> String {
    if inspection_id.starts_with("audit_") {
        return inspection_id.to_string();
    }
    format!("audit_{}", inspection_id.replace('-', ""))
}

/// Collects the inspections deleted since a point in time
#[derive(Debug)]
pub struct DeletionReconciler<'a> {
    client: &'a HttpClient,
    org_id: &'a str,
    page_size: u32,
    span: Span,
}

impl<'a> DeletionReconciler<'a> {
    pub fn new(client: &'a HttpClient, org_id: &'a str) -> Self {
        Self {
            client,
            org_id,
            page_size: PAGE_SIZE,
            span: Span::none(),
        }
    }

    /// Parent log events on `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Drain the activity log from `from`, returning deleted inspection keys
    ///
    /// Any transport error aborts the whole reconciliation.
    pub async fn deleted_since(&self, from: DateTime<Utc>) -> Result<Vec<String>> {
        let mut state = ReconcileState::Start;
        let mut deleted = Vec::new();

        loop {
            state = match state {
                ReconcileState::Start => ReconcileState::Fetching { page_token: None },
                ReconcileState::Fetching { page_token } => {
                    let page = self.fetch(from, page_token.as_deref()).await?;
                    deleted.extend(page.activities.iter().filter_map(|a| {
                        (a.kind == INSPECTION_DELETED)
                            .then(|| a.metadata.get("inspection_id").and_then(Value::as_str))
                            .flatten()
                            .map(audit_id)
                    }));

                    match page.next_page_token.filter(|t| !t.is_empty()) {
                        Some(token) => ReconcileState::Fetching {
                            page_token: Some(token),
                        },
                        None => ReconcileState::Done,
                    }
                }
                ReconcileState::Done => break,
            };
        }

        debug!(parent: &self.span, deleted = deleted.len(), "activity log drained");
        Ok(deleted)
    }

    async fn fetch(&self, from: DateTime<Utc>, page_token: Option<&str>) -> Result<ActivityPage> {
        let body = json!({
            "org_id": self.org_id,
            "page_size": self.page_size,
            "page_token": page_token.unwrap_or_default(),
            "filters": {
                "timeframe": { "from": from.to_rfc3339_opts(SecondsFormat::AutoSi, true) },
                "event_types": [INSPECTION_DELETED],
                "limit": self.page_size,
            },
        });
        self.client.post_json(ACTIVITY_LOG_PATH, body).await
    }
}
