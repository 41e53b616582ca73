//! CLI commands and argument parsing

use crate::config::ExporterConfig;
use crate::types::ReportFormat;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Export inspection-platform feeds to CSV, SQL or JSON
#[derive(Parser, Debug)]
#[command(name = "feed-exporter")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(long, global = true, default_value = "exporter.yaml")]
    pub config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// API access token
    #[arg(long, global = true)]
    pub access_token: Option<String>,

    /// API base URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Export directory
    #[arg(long, global = true)]
    pub export_path: Option<PathBuf>,

    /// Feeds to export (comma-separated, empty = all)
    #[arg(long, global = true, value_delimiter = ',')]
    pub tables: Vec<String>,

    /// Resume from stored watermarks (true) or refresh everything (false)
    #[arg(long, global = true)]
    pub incremental: Option<bool>,

    /// Only export rows modified after this date (YYYY-MM-DD)
    #[arg(long, global = true)]
    pub modified_after: Option<NaiveDate>,

    /// Create tables or header-only files without fetching rows
    #[arg(long, global = true)]
    pub create_schema_only: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export feeds to CSV files
    Csv,

    /// Export feeds to a SQL database
    Sql,

    /// Export each inspection as a JSON document
    InspectionJson,

    /// Download inspection reports
    Report {
        /// Report formats (comma-separated: pdf, word)
        #[arg(long, value_delimiter = ',', value_parser = parse_format)]
        format: Vec<ReportFormat>,
    },

    /// Print each feed's columns as a CSV header row
    Schema,

    /// Write a configuration file with the current settings
    Configure,
}

fn parse_format(s: &str) -> Result<ReportFormat, String> {
    s.parse().map_err(|e: crate::Error| e.to_string())
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, config: &mut ExporterConfig) {
        if let Some(token) = &self.access_token {
            config.access_token.clone_from(token);
        }
        if let Some(url) = &self.api_url {
            config.api.url.clone_from(url);
        }
        if let Some(path) = &self.export_path {
            config.export.media_path = path.join("media");
            config.export.path.clone_from(path);
        }
        if !self.tables.is_empty() {
            config.export.tables.clone_from(&self.tables);
        }
        if let Some(incremental) = self.incremental {
            config.export.incremental = incremental;
        }
        if self.modified_after.is_some() {
            config.export.modified_after = self.modified_after;
        }
        if let Commands::Report { format } = &self.command {
            if !format.is_empty() {
                config.report.format.clone_from(format);
            }
        }
    }
}
