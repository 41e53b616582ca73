//! Per-inspection JSON export
//!
//! Lists inspection ids with the modified-after cursor, fetches each full
//! inspection on a bounded pool and writes it as `{export}/{audit_id}.json`.
//! The export directory's `last-modified` marker records how far the
//! listing has got, so the next incremental run resumes from there.

mod client;

pub use client::{InspectionClient, InspectionExportOptions, InspectionExportReport, SEARCH_PATH};
