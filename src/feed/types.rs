//! Feed descriptor types

use crate::pagination::FeedRequest;
use crate::types::SyncMode;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// Columns
// ============================================================================

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Float,
    Bool,
    Timestamp,
}

impl ColumnKind {
    /// Column type used in DDL
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Text => "VARCHAR",
            ColumnKind::Integer => "BIGINT",
            ColumnKind::Float => "DOUBLE",
            ColumnKind::Bool => "BOOLEAN",
            ColumnKind::Timestamp => "TIMESTAMP",
        }
    }
}

/// One column of a feed table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name in storage
    pub name: &'static str,
    /// Key in the remote record
    pub source: &'static str,
    pub kind: ColumnKind,
    /// Absent values stay NULL instead of taking the kind's zero value
    pub nullable: bool,
    /// Filled with the write time rather than read from the record
    pub stamped: bool,
}

impl ColumnDef {
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            source: name,
            kind,
            nullable: false,
            stamped: false,
        }
    }

    /// Read the value from a differently named record key
    #[must_use]
    pub const fn key(mut self, source: &'static str) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// The `exported_at` column every table carries
    pub const fn exported_at() -> Self {
        Self {
            name: "exported_at",
            source: "exported_at",
            kind: ColumnKind::Timestamp,
            nullable: false,
            stamped: true,
        }
    }
}

pub const fn text(name: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnKind::Text)
}

pub const fn int(name: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnKind::Integer)
}

pub const fn float(name: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnKind::Float)
}

pub const fn boolean(name: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnKind::Bool)
}

pub const fn timestamp(name: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnKind::Timestamp)
}

// ============================================================================
// Cells and rows
// ============================================================================

/// One typed value of a row
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Cell::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(v) => write!(f, "{v}"),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.6f")),
        }
    }
}

/// A row in column order
pub type Row = Vec<Cell>;

// ============================================================================
// Policies
// ============================================================================

/// When a feed's table is cleared before it is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncatePolicy {
    /// Rows are replaced through a [`ScopedDelete`], even on a full refresh
    Never,
    /// Every run replays the whole table
    Always,
    /// When the sink cannot upsert or the run is a full refresh
    WhenNoUpsert,
    /// Only when the run is a full refresh
    WhenFullRefresh,
}

impl TruncatePolicy {
    pub fn applies(self, mode: SyncMode, supports_upsert: bool) -> bool {
        match self {
            TruncatePolicy::Never => false,
            TruncatePolicy::Always => true,
            TruncatePolicy::WhenNoUpsert => !supports_upsert || !mode.is_incremental(),
            TruncatePolicy::WhenFullRefresh => !mode.is_incremental(),
        }
    }
}

/// Rows removed while a feed is replayed, narrower than a truncate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopedDelete {
    None,
    /// Delete the organisation's rows before draining
    Organisation,
    /// Delete rows whose parent column matches a value in the page
    Parent(&'static str),
}

/// Records dropped before they are written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipFilter {
    pub column: &'static str,
    pub ids: HashSet<String>,
}

// ============================================================================
// Descriptor
// ============================================================================

/// Declarative definition of one remote feed and its table
#[derive(Debug, Clone)]
pub struct FeedDescriptor {
    /// Table or file name
    pub name: &'static str,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<&'static str>,
    /// `ORDER BY` clause used when the table is read back
    pub order: &'static str,
    /// Initial request, without the `modified_after` lower bound
    pub request: FeedRequest,
    /// Only rows modified after the watermark are fetched
    pub incremental: bool,
    /// Column the watermark is read from
    pub modified_column: Option<&'static str>,
    pub truncate: TruncatePolicy,
    pub depends_on: Option<&'static str>,
    pub scoped_delete: ScopedDelete,
    pub skip: Option<SkipFilter>,
    /// Deleted inspections are reconciled after the drain
    pub reconcile_deletions: bool,
    /// Rows reference downloadable media
    pub media: bool,
}

impl FeedDescriptor {
    /// Descriptor with an empty column list and default policies
    pub fn new(name: &'static str, endpoint: &'static str) -> Self {
        Self {
            name,
            columns: Vec::new(),
            primary_key: Vec::new(),
            order: "",
            request: FeedRequest::new(endpoint),
            incremental: false,
            modified_column: None,
            truncate: TruncatePolicy::WhenNoUpsert,
            depends_on: None,
            scoped_delete: ScopedDelete::None,
            skip: None,
            reconcile_deletions: false,
            media: false,
        }
    }

    /// Columns followed by `exported_at`
    #[must_use]
    pub fn columns(mut self, columns: impl IntoIterator<Item = ColumnDef>) -> Self {
        self.columns = columns.into_iter().collect();
        self.columns.push(ColumnDef::exported_at());
        self
    }

    #[must_use]
    pub fn primary_key(mut self, key: &[&'static str]) -> Self {
        self.primary_key = key.to_vec();
        self
    }

    #[must_use]
    pub fn order(mut self, order: &'static str) -> Self {
        self.order = order;
        self
    }

    /// Adjust the initial request
    #[must_use]
    pub fn request(mut self, f: impl FnOnce(FeedRequest) -> FeedRequest) -> Self {
        self.request = f(self.request);
        self
    }

    /// Fetch incrementally, tracking the watermark in `column`
    #[must_use]
    pub fn incremental(mut self, column: &'static str) -> Self {
        self.incremental = true;
        self.modified_column = Some(column);
        self.truncate = TruncatePolicy::WhenFullRefresh;
        self
    }

    #[must_use]
    pub fn truncate(mut self, policy: TruncatePolicy) -> Self {
        self.truncate = policy;
        self
    }

    #[must_use]
    pub fn depends_on(mut self, feed: &'static str) -> Self {
        self.depends_on = Some(feed);
        self
    }

    #[must_use]
    pub fn scoped_delete(mut self, scope: ScopedDelete) -> Self {
        self.scoped_delete = scope;
        self
    }

    /// Drop records whose `column` is one of `ids`
    #[must_use]
    pub fn skip_ids(mut self, column: &'static str, ids: &[String]) -> Self {
        if !ids.is_empty() {
            self.skip = Some(SkipFilter {
                column,
                ids: ids.iter().cloned().collect(),
            });
        }
        self
    }

    #[must_use]
    pub fn reconcile_deletions(mut self) -> Self {
        self.reconcile_deletions = true;
        self
    }

    #[must_use]
    pub fn media(mut self, enabled: bool) -> Self {
        self.media = enabled;
        self
    }

    /// Whether the table is cleared before this run writes to it
    pub fn truncate_before_sync(&self, mode: SyncMode, supports_upsert: bool) -> bool {
        self.truncate.applies(mode, supports_upsert)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// Positions of the primary key columns
    pub fn key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|k| self.column_index(k))
            .collect()
    }

    /// Columns that are not part of the primary key
    pub fn value_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns
            .iter()
            .filter(move |c| !self.primary_key.contains(&c.name))
    }
}
