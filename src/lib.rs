//! # Feed Exporter
//!
//! Incremental exporter for the paginated feeds of an inspection platform's
//! REST API. Each feed is drained page by page into a storage sink: CSV
//! files, a SQL database, or one JSON document per inspection. Inspection
//! reports can be rendered to PDF or WORD alongside.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use feed_exporter::{cli::build_client, config::ExporterConfig, engine::SyncEngine, sink::SqlSink};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> feed_exporter::Result<()> {
//!     let config = ExporterConfig::load("exporter.yaml")?;
//!     let sink = SqlSink::connect(&config.db, &config.export.media_path)?;
//!     let report = SyncEngine::new(build_client(&config)?, Arc::new(sink), &config)
//!         .export_feeds()
//!         .await?;
//!     println!("{} rows", report.rows_written);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          SyncEngine                            │
//! │   plan feeds → resolve watermark → drain → reconcile → commit  │
//! └───────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────┬──────────────┬────┴──────┬──────────────┬──────────┐
//! │   HTTP   │  Pagination  │   Feeds   │    Sinks     │ Reports  │
//! ├──────────┼──────────────┼───────────┼──────────────┼──────────┤
//! │ Retry    │ next_page    │ Catalog   │ CSV          │ Initiate │
//! │ Backoff  │ modified     │ Mapping   │ SQL (DuckDB) │ Poll     │
//! │ Throttle │   _after     │ Batching  │ JSON         │ Download │
//! └──────────┴──────────────┴───────────┴──────────────┴──────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// Common types and type aliases
pub mod types;

/// Exporter configuration
pub mod config;

/// Tracing setup and component spans
pub mod logging;

/// HTTP client with retry and rate limiting
pub mod http;

/// Pagination strategies
pub mod pagination;

/// Feed catalog and row mapping
pub mod feed;

/// Storage sinks
pub mod sink;

/// Sync orchestrator
pub mod engine;

/// Per-inspection JSON export
pub mod inspections;

/// Inspection report rendering
pub mod report;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
