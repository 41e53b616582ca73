//! Exporter configuration
//!
//! The YAML file is deserialized into [`ExporterConfig`], CLI overrides are
//! applied on top, and [`ExporterConfig::apply_safety_guards`] caps the
//! values the remote API would reject. The rest of the crate only ever sees
//! the resolved struct.

use crate::error::{Error, Result};
use crate::types::{Dialect, FilenameConvention, ReportFormat};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};

/// Maximum page size for action, issue and asset feeds
pub const MAX_FEED_LIMIT: u32 = 100;

/// Maximum page size for the training course progress feed
pub const MAX_COURSE_PROGRESS_LIMIT: u32 = 1000;

/// Default report retry timeout in seconds
pub const DEFAULT_REPORT_RETRY_TIMEOUT: u64 = 15;

/// Hard cap on the report retry timeout in seconds
pub const MAX_REPORT_RETRY_TIMEOUT: u64 = 60;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Complete exporter configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// API access token
    pub access_token: String,

    /// API connection settings
    pub api: ApiConfig,

    /// CSV sink settings
    pub csv: CsvConfig,

    /// SQL sink settings
    pub db: DbConfig,

    /// What to export and where
    pub export: ExportConfig,

    /// Report rendering settings
    pub report: ReportConfig,

    /// Worker pool size for per-inspection fetches, media and reports
    pub concurrency: usize,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            api: ApiConfig::default(),
            csv: CsvConfig::default(),
            db: DbConfig::default(),
            export: ExportConfig::default(),
            report: ReportConfig::default(),
            concurrency: 10,
        }
    }
}

impl ExporterConfig {
    /// Load from a YAML file and apply safety guards
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse YAML text and apply safety guards
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(contents)?;
        config.apply_safety_guards();
        Ok(config)
    }

    /// Write the configuration as YAML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = serde_yaml::to_string(self)?;
        std::fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    /// Cap values to what the API and the report poller accept
    pub fn apply_safety_guards(&mut self) {
        let export = &mut self.export;
        export.action.limit = export.action.limit.min(MAX_FEED_LIMIT);
        export.issue.limit = export.issue.limit.min(MAX_FEED_LIMIT);
        export.asset.limit = export.asset.limit.min(MAX_FEED_LIMIT);
        export.inspection.limit = export.inspection.limit.min(MAX_FEED_LIMIT);
        export.course_progress.limit = export
            .course_progress
            .limit
            .min(MAX_COURSE_PROGRESS_LIMIT);

        self.report.retry_timeout = match self.report.retry_timeout {
            0 => DEFAULT_REPORT_RETRY_TIMEOUT,
            t => t.min(MAX_REPORT_RETRY_TIMEOUT),
        };

        self.concurrency = self.concurrency.max(1);
        self.csv.max_rows_per_file = self.csv.max_rows_per_file.max(1);
    }

    /// Lower bound for incremental syncs, `None` when unset
    pub fn modified_after(&self) -> Option<DateTime<Utc>> {
        self.export
            .modified_after
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// Check the fields every export needs
    pub fn validate(&self) -> Result<()> {
        if self.access_token.trim().is_empty() {
            return Err(Error::invalid_value("access_token", "must not be empty"));
        }
        url::Url::parse(&self.api.url)?;
        Ok(())
    }
}

// ============================================================================
// Sections
// ============================================================================

/// API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API base URL
    pub url: String,
    /// Optional HTTP proxy
    pub proxy_url: Option<String>,
    /// PEM file with an extra trusted certificate
    pub tls_cert: Option<PathBuf>,
    /// Skip TLS certificate verification
    pub tls_skip_verify: bool,
    /// Client-side request throttle, unset means unthrottled
    pub requests_per_second: Option<u32>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "https://api.safetyculture.io".to_string(),
            proxy_url: None,
            tls_cert: None,
            tls_skip_verify: false,
            requests_per_second: None,
        }
    }
}

/// CSV sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    /// Rows per file before rotating
    pub max_rows_per_file: usize,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            max_rows_per_file: 1_000_000,
        }
    }
}

/// SQL sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub dialect: Dialect,
    pub connection_string: String,
    /// Create and migrate tables automatically
    pub auto_migrate: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Mysql,
            connection_string: String::new(),
            auto_migrate: true,
        }
    }
}

/// Export selection and destinations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Export directory
    pub path: PathBuf,
    /// Media directory
    pub media_path: PathBuf,
    /// Download inspection media
    pub media: bool,
    /// Resume from the stored watermark instead of a full refresh
    pub incremental: bool,
    /// Only export rows modified after this date
    #[serde(
        deserialize_with = "deserialize_optional_date",
        serialize_with = "serialize_optional_date"
    )]
    pub modified_after: Option<NaiveDate>,
    /// Feed allow-list, empty means all feeds
    pub tables: Vec<String>,
    /// Restrict inspection-derived feeds to these templates
    pub template_ids: Vec<String>,
    pub inspection: InspectionConfig,
    pub site: SiteConfig,
    pub action: LimitConfig,
    pub issue: LimitConfig,
    pub asset: LimitConfig,
    pub course_progress: LimitConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./export/"),
            media_path: PathBuf::from("./export/media/"),
            media: false,
            incremental: true,
            modified_after: None,
            tables: Vec::new(),
            template_ids: Vec::new(),
            inspection: InspectionConfig::default(),
            site: SiteConfig::default(),
            action: LimitConfig { limit: 100 },
            issue: LimitConfig { limit: 100 },
            asset: LimitConfig { limit: 100 },
            course_progress: LimitConfig { limit: 1000 },
        }
    }
}

/// Inspection feed filters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionConfig {
    /// "true", "false" or "both"
    pub archived: String,
    /// "true", "false" or "both"
    pub completed: String,
    pub included_inactive_items: bool,
    pub limit: u32,
    pub skip_ids: Vec<String>,
    /// "private" or "public"
    pub web_report_link: String,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            archived: "false".to_string(),
            completed: "true".to_string(),
            included_inactive_items: false,
            limit: 100,
            skip_ids: Vec::new(),
            web_report_link: "private".to_string(),
        }
    }
}

/// Site feed filters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub include_deleted: bool,
    pub include_full_hierarchy: bool,
}

/// Page size for a feed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    pub limit: u32,
}

/// Report rendering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub format: Vec<ReportFormat>,
    pub filename_convention: FilenameConvention,
    pub preference_id: Option<String>,
    /// Seconds to keep polling a render before giving up
    pub retry_timeout: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: vec![ReportFormat::Pdf],
            filename_convention: FilenameConvention::InspectionTitle,
            preference_id: None,
            retry_timeout: DEFAULT_REPORT_RETRY_TIMEOUT,
        }
    }
}

// ============================================================================
// Optional dates
// ============================================================================

/// An empty or missing value is `None`, never an error
fn deserialize_optional_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| Some(dt.with_timezone(&Utc).date_naive()))
        .map_err(|e| serde::de::Error::custom(format!("failed to parse {raw:?} as a date: {e}")))
}

fn serialize_optional_date<S>(value: &Option<NaiveDate>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(date) => serializer.serialize_str(&date.format("%Y-%m-%d").to_string()),
        None => serializer.serialize_str(""),
    }
}
