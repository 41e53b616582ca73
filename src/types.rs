//! Common types used throughout the exporter
//!
//! Small enums shared by configuration, sinks and the report exporter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

// ============================================================================
// Sync Mode
// ============================================================================

/// How a feed is refreshed on this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Truncate and fetch everything
    FullRefresh,
    /// Fetch only rows modified after the watermark
    #[default]
    Incremental,
}

impl SyncMode {
    /// Pick the mode from the `incremental` flag
    pub fn from_incremental(incremental: bool) -> Self {
        if incremental {
            Self::Incremental
        } else {
            Self::FullRefresh
        }
    }

    pub fn is_incremental(self) -> bool {
        self == Self::Incremental
    }
}

// ============================================================================
// Backoff Type
// ============================================================================

/// Type of backoff for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}

// ============================================================================
// SQL Dialect
// ============================================================================

/// Target database dialect for the SQL sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Mysql,
    Postgres,
    Sqlserver,
    Sqlite,
    /// Native DuckDB file, also used for CSV staging
    Duckdb,
}

impl Dialect {
    /// Maximum number of bound parameters in one statement
    pub fn parameter_limit(self) -> usize {
        match self {
            Dialect::Sqlserver => 2100,
            Dialect::Sqlite => 32768,
            Dialect::Mysql | Dialect::Postgres | Dialect::Duckdb => 65536,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Sqlserver => "sqlserver",
            Dialect::Sqlite => "sqlite",
            Dialect::Duckdb => "duckdb",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" => Ok(Dialect::Mysql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlserver" | "mssql" => Ok(Dialect::Sqlserver),
            "sqlite" => Ok(Dialect::Sqlite),
            "duckdb" => Ok(Dialect::Duckdb),
            other => Err(crate::Error::invalid_value(
                "db.dialect",
                format!("unsupported dialect {other:?}"),
            )),
        }
    }
}

// ============================================================================
// Report Types
// ============================================================================

/// Rendered report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportFormat {
    Pdf,
    Word,
}

impl ReportFormat {
    /// Name the report API expects
    pub fn api_name(self) -> &'static str {
        match self {
            ReportFormat::Pdf => "PDF",
            ReportFormat::Word => "WORD",
        }
    }

    /// File extension of the rendered document
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Word => "docx",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PDF" => Ok(ReportFormat::Pdf),
            "WORD" | "DOCX" => Ok(ReportFormat::Word),
            other => Err(crate::Error::invalid_value(
                "report.format",
                format!("unsupported report format {other:?}"),
            )),
        }
    }
}

/// How report files are named
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilenameConvention {
    #[default]
    InspectionTitle,
    InspectionId,
}

// ============================================================================
// Utilities
// ============================================================================

/// Extension trait for Option<String> to handle empty strings
pub trait OptionStringExt {
    /// Returns None if the string is empty
    fn none_if_empty(self) -> Option<String>;
}

impl OptionStringExt for Option<String> {
    fn none_if_empty(self) -> Option<String> {
        self.filter(|s| !s.trim().is_empty())
    }
}

impl OptionStringExt for String {
    fn none_if_empty(self) -> Option<String> {
        if self.trim().is_empty() {
            None
        } else {
            Some(self)
        }
    }
}
