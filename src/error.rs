//! Error types for the exporter
//!
//! Every fallible operation in the crate returns `Result<T, Error>`.
//! Lower layers never interpret errors; the sync orchestrator is the one
//! place that decides between "skip this feed" and "abort the run".

use std::fmt;
use thiserror::Error;

/// The main error type for the exporter
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // HTTP Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Giving up on {url} after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        url: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Operation cancelled")]
    Cancelled,

    // ============================================================================
    // Data Errors
    // ============================================================================
    #[error("Cannot map {feed} row: {message}")]
    Mapping { feed: String, message: String },

    #[error("Failed to decode response: {message}")]
    Decode { message: String },

    // ============================================================================
    // Storage Errors
    // ============================================================================
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Storage error: {message}")]
    Storage { message: String },

    // ============================================================================
    // Report Errors
    // ============================================================================
    #[error("Failed to generate {pdf} PDF reports and {word} WORD reports")]
    ReportsFailed { pdf: usize, word: usize },

    #[error("Report error: {message}")]
    Report { message: String },

    // ============================================================================
    // Wrapping
    // ============================================================================
    #[error(transparent)]
    Event(#[from] EventError),

    #[error("feed {feed:?}: {source}")]
    Feed {
        feed: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{message}: {source}")]
    Context {
        message: String,
        #[source]
        source: Box<Error>,
    },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            body: body.into(),
        }
    }

    /// Create a mapping error for a feed
    pub fn mapping(feed: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            feed: feed.into(),
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a report error
    pub fn report(message: impl Into<String>) -> Self {
        Self::Report {
            message: message.into(),
        }
    }

    /// Wrap an error with the name of the feed it came from
    pub fn feed(feed: impl Into<String>, source: Error) -> Self {
        Self::Feed {
            feed: feed.into(),
            source: Box::new(source),
        }
    }

    /// Tag an error with severity and subsystem
    pub fn event(source: Error, severity: Severity, subsystem: Subsystem, fatal: bool) -> Self {
        Self::Event(EventError::new(source, severity, subsystem, fatal))
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Timeout { .. } => true,
            Error::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// HTTP status at the root of this error, looking through wrappers
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            Error::MaxRetriesExceeded { source, .. }
            | Error::Feed { source, .. }
            | Error::Context { source, .. } => source.status(),
            Error::Event(e) => e.source.status(),
            _ => None,
        }
    }

    /// Whether the root cause is an HTTP 403
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }

    /// Whether an event tagged fatal sits anywhere in the chain
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::MaxRetriesExceeded { source, .. }
            | Error::Feed { source, .. }
            | Error::Context { source, .. } => source.is_fatal(),
            Error::Event(e) => e.fatal || e.source.is_fatal(),
            _ => false,
        }
    }

    /// Whether the run was cancelled
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::MaxRetriesExceeded { source, .. }
            | Error::Feed { source, .. }
            | Error::Context { source, .. } => source.is_cancelled(),
            Error::Event(e) => e.source.is_cancelled(),
            _ => false,
        }
    }
}

/// Check if an HTTP status code is retryable
pub(crate) fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Result type alias for the exporter
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Event errors
// ============================================================================

/// How serious an event is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Which part of the system raised an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Db,
    DataIntegrity,
    Api,
    FileOperations,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Subsystem::Db => "DB",
            Subsystem::DataIntegrity => "Data Integrity",
            Subsystem::Api => "API",
            Subsystem::FileOperations => "File Operations",
        };
        f.write_str(s)
    }
}

/// An error tagged with severity, subsystem and a fatal flag
#[derive(Debug)]
pub struct EventError {
    pub severity: Severity,
    pub subsystem: Subsystem,
    pub fatal: bool,
    pub message: Option<String>,
    pub source: Box<Error>,
}

impl EventError {
    /// Tag an error
    pub fn new(source: Error, severity: Severity, subsystem: Subsystem, fatal: bool) -> Self {
        Self {
            severity,
            subsystem,
            fatal,
            message: None,
            source: Box::new(source),
        }
    }

    /// Prefix the error with a message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{message}: {}", self.source),
            None => write!(f, "{}", self.source),
        }
    }
}

impl std::error::Error for EventError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

// ============================================================================
// Context helpers
// ============================================================================

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;

    /// Tag the error as an event from `subsystem`
    fn event(self, subsystem: Subsystem, message: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            message: message.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::Context {
            message: f(),
            source: Box::new(e.into()),
        })
    }

    fn event(self, subsystem: Subsystem, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            Error::Event(
                EventError::new(e.into(), Severity::Error, subsystem, false).with_message(message),
            )
        })
    }
}
