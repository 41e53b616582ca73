//! Pagination types and traits

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Initial request for a feed: a URL and its query parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl FeedRequest {
    /// Request `url` with no parameters
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Append a parameter unless the value is empty
    #[must_use]
    pub fn param_if_set(self, key: &str, value: &str) -> Self {
        if value.is_empty() {
            self
        } else {
            self.param(key, value)
        }
    }

    /// Append a boolean parameter only when it is true
    #[must_use]
    pub fn flag(self, key: &str, value: bool) -> Self {
        if value {
            self.param(key, "true")
        } else {
            self
        }
    }

    /// Append a numeric limit unless it is zero
    #[must_use]
    pub fn limit(self, key: &str, value: u32) -> Self {
        if value == 0 {
            self
        } else {
            self.param(key, value.to_string())
        }
    }

    /// Append a timestamp lower bound when present
    #[must_use]
    pub fn modified_after(self, after: Option<DateTime<Utc>>) -> Self {
        match after {
            Some(ts) => self.param(
                "modified_after",
                ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
            None => self,
        }
    }

    /// Repeat `key` once per value
    #[must_use]
    pub fn repeated(mut self, key: &str, values: &[String]) -> Self {
        for value in values {
            self.params.push((key.to_string(), value.clone()));
        }
        self
    }

    /// Replace every occurrence of `key` with a single value
    #[must_use]
    pub fn with_replaced(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.retain(|(k, _)| k != key);
        self.params.push((key.to_string(), value.into()));
        self
    }

    /// First value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// One decoded page of a feed
#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based position in the drain
    pub number: usize,
    /// Records in remote order
    pub records: Vec<Value>,
    /// Records the remote says are still to come, when it says
    pub remaining: Option<i64>,
}

/// Result of the next page computation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextPage {
    /// Issue `request` next
    Continue {
        /// Full request, parameters included
        request: FeedRequest,
    },
    /// No more pages
    Done,
}

impl NextPage {
    /// Follow a URL exactly as given
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::Continue {
            request: FeedRequest::new(url),
        }
    }

    /// Check if this is a done result
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Tracks pagination state during a drain
#[derive(Debug, Clone, Default)]
pub struct PaginationState {
    /// Pages fetched so far
    pub pages: usize,
    /// Records fetched so far
    pub total_fetched: u64,
    /// Is pagination complete?
    pub done: bool,
}

impl PaginationState {
    /// Record a fetched page
    pub fn add_page(&mut self, records: usize) {
        self.pages += 1;
        self.total_fetched += records as u64;
    }

    /// Mark pagination as complete
    pub fn mark_done(&mut self) {
        self.done = true;
    }
}

/// Core trait for cursor styles
pub trait Paginator: Send + Sync {
    /// Pull the records out of a response body
    fn records(&self, body: &Value) -> Result<Vec<Value>>;

    /// Remaining-record estimate, if the response carries one
    fn remaining(&self, _body: &Value) -> Option<i64> {
        None
    }

    /// Decide what to request after `current`
    fn process_response(
        &self,
        body: &Value,
        current: &FeedRequest,
        records: &[Value],
        state: &mut PaginationState,
    ) -> Result<NextPage>;
}
