//! Inspection report rendering
//!
//! Each (inspection, format) pair is a [`ReportJob`] driven through
//! `Pending -> Initiated -> Polling -> Succeeded | Failed | Expired`:
//!
//! - initiate: `POST audits/{id}/report` returns a message id
//! - poll: `GET audits/{id}/report/{message_id}` until `SUCCESS` or `FAILED`,
//!   waiting `min(floor(elapsed / 20) + 1, 4)` poll units between checks
//! - download: the finished file is fetched from the returned url and saved
//!   under `{export}/reports/` with a sanitized, de-duplicated name
//!
//! Jobs run on a bounded pool. Every job reaches a terminal state before the
//! run reports failures, as one aggregate error.

mod exporter;
mod naming;
mod types;

pub use exporter::{ReportExporter, ReportOptions, REPORT_EXPORTS_TABLE};
pub use naming::{
    base_name, file_name, name_budget, sanitize_name, truncate_bytes, unique_file_name,
    MAX_FILE_NAME_BYTES, MAX_PATH_BYTES,
};
pub use types::{poll_wait, JobState, ReportJob, ReportSummary, ReportTarget};

#[cfg(test)]
mod tests;
