//! CLI module
//!
//! Command-line interface for the exporter.
//!
//! # Commands
//!
//! - `csv` - Export feeds to CSV files
//! - `sql` - Export feeds to a SQL database
//! - `inspection-json` - Export each inspection as a JSON document
//! - `report` - Download inspection reports
//! - `schema` - Print each feed's CSV header row
//! - `configure` - Write a configuration file

mod commands;
mod runner;

pub use commands::{Cli, Commands};
pub use runner::{build_client, render_schema, Runner};
