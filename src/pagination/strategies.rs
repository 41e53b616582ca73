//! Cursor strategies
//!
//! Each strategy pulls records out of a response and works out the next
//! request.

use super::types::{FeedRequest, NextPage, PaginationState, Paginator};
use crate::error::{Error, Result};
use serde_json::Value;

/// Read an array field, treating `null` or absence as an empty page
fn array_field(body: &Value, field: &str) -> Result<Vec<Value>> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => Err(Error::decode(format!(
            "expected '{field}' to be an array, got {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Next Page URL
// ============================================================================

/// Token cursor used by the `/feed/*` endpoints
///
/// ```json
/// { "metadata": { "next_page": "/feed/users?cursor=abc", "remaining_records": 10 },
///   "data": [ ... ] }
/// ```
#[derive(Debug, Clone, Default)]
pub struct NextPageUrlPaginator;

impl Paginator for NextPageUrlPaginator {
    fn records(&self, body: &Value) -> Result<Vec<Value>> {
        array_field(body, "data")
    }

    fn remaining(&self, body: &Value) -> Option<i64> {
        body.pointer("/metadata/remaining_records")
            .and_then(Value::as_i64)
    }

    fn process_response(
        &self,
        body: &Value,
        _current: &FeedRequest,
        records: &[Value],
        state: &mut PaginationState,
    ) -> Result<NextPage> {
        state.add_page(records.len());

        match body.pointer("/metadata/next_page").and_then(Value::as_str) {
            Some(next) if !next.is_empty() => Ok(NextPage::with_url(next)),
            _ => {
                state.mark_done();
                Ok(NextPage::Done)
            }
        }
    }
}

// ============================================================================
// Modified After
// ============================================================================

/// Offset-style cursor keyed on modification time, used by `/audits/search`
///
/// ```json
/// { "count": 2, "total": 5,
///   "audits": [ { "audit_id": "audit_1", "modified_at": "2023-01-01T00:00:00Z" } ] }
/// ```
#[derive(Debug, Clone)]
pub struct ModifiedAfterPaginator {
    /// Field holding the records
    pub records_field: String,
    /// Record field carrying the modification time
    pub cursor_field: String,
    /// Query parameter the cursor goes into
    pub cursor_param: String,
}

impl Default for ModifiedAfterPaginator {
    fn default() -> Self {
        Self {
            records_field: "audits".to_string(),
            cursor_field: "modified_at".to_string(),
            cursor_param: "modified_after".to_string(),
        }
    }
}

impl Paginator for ModifiedAfterPaginator {
    fn records(&self, body: &Value) -> Result<Vec<Value>> {
        array_field(body, &self.records_field)
    }

    fn remaining(&self, body: &Value) -> Option<i64> {
        let count = body.get("count").and_then(Value::as_i64)?;
        let total = body.get("total").and_then(Value::as_i64)?;
        Some(total - count)
    }

    fn process_response(
        &self,
        body: &Value,
        current: &FeedRequest,
        records: &[Value],
        state: &mut PaginationState,
    ) -> Result<NextPage> {
        state.add_page(records.len());

        let remaining = self.remaining(body).unwrap_or(0);
        if remaining <= 0 || records.is_empty() {
            state.mark_done();
            return Ok(NextPage::Done);
        }

        let cursor = records
            .last()
            .and_then(|r| r.get(&self.cursor_field))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::decode(format!(
                    "last record has no '{}' to continue from",
                    self.cursor_field
                ))
            })?;

        Ok(NextPage::Continue {
            request: current.clone().with_replaced(&self.cursor_param, cursor),
        })
    }
}
