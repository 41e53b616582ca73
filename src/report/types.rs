//! Report job types

use crate::types::ReportFormat;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Server status of a finished render
pub const STATUS_SUCCESS: &str = "SUCCESS";
/// Server status of a failed render
pub const STATUS_FAILED: &str = "FAILED";

/// An inspection whose reports are wanted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTarget {
    pub audit_id: String,
    pub name: String,
    pub modified_at: DateTime<Utc>,
}

/// Where a report job is in its cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    /// Render requested
    Initiated { message_id: String },
    /// Waiting for the render; `elapsed` counts time spent waiting so far
    Polling { message_id: String, elapsed: Duration },
    Succeeded { file_name: String },
    Failed { reason: String },
    /// Still rendering when the retry timeout ran out
    Expired { elapsed: Duration },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded { .. } | JobState::Failed { .. } | JobState::Expired { .. }
        )
    }

    /// Expired jobs count as failures
    pub fn is_failure(&self) -> bool {
        matches!(self, JobState::Failed { .. } | JobState::Expired { .. })
    }
}

/// One (inspection, format) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportJob {
    pub target: ReportTarget,
    pub format: ReportFormat,
    /// File written by an earlier run, replaced on success
    pub previous_file: Option<String>,
    pub state: JobState,
}

impl ReportJob {
    pub fn new(target: ReportTarget, format: ReportFormat) -> Self {
        Self {
            target,
            format,
            previous_file: None,
            state: JobState::Pending,
        }
    }

    /// `name (id)` for log lines
    pub fn label(&self) -> String {
        format!("{} ({})", self.target.name, self.target.audit_id)
    }
}

/// Wait before the next poll: `min(floor(elapsed / 20 units) + 1, 4)` units
pub fn poll_wait(elapsed: Duration, unit: Duration) -> Duration {
    if unit.is_zero() {
        return unit;
    }
    let steps = (elapsed.as_nanos() / unit.as_nanos()) as u32;
    unit * (steps / 20 + 1).min(4)
}

/// Totals of a report run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub pdf_saved: usize,
    pub word_saved: usize,
    pub pdf_failed: usize,
    pub word_failed: usize,
    /// Jobs skipped because the saved report is current
    pub unchanged: usize,
}

impl ReportSummary {
    pub fn record(&mut self, format: ReportFormat, state: &JobState) {
        match (format, state.is_failure()) {
            (ReportFormat::Pdf, false) => self.pdf_saved += 1,
            (ReportFormat::Word, false) => self.word_saved += 1,
            (ReportFormat::Pdf, true) => self.pdf_failed += 1,
            (ReportFormat::Word, true) => self.word_failed += 1,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.pdf_failed > 0 || self.word_failed > 0
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct InitiateResponse {
    #[serde(rename = "messageId")]
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub url: String,
}
