//! JSON records to typed rows

use super::types::{Cell, ColumnDef, ColumnKind, FeedDescriptor, Row};
use crate::error::{Error, Result, ResultExt, Subsystem};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;

/// Rows mapped from one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedPage {
    /// Rows to write, one per primary key
    pub rows: Vec<Row>,
    /// Latest modification time among the rows, if the feed tracks one
    pub max_modified: Option<DateTime<Utc>>,
    /// Records dropped by the skip list
    pub skipped: usize,
}

/// Map a page of records for `feed`
///
/// Records whose skip column is listed are dropped. When several records
/// share a primary key the last one wins.
pub fn map_records(
    feed: &FeedDescriptor,
    records: &[Value],
    exported_at: DateTime<Utc>,
) -> Result<MappedPage> {
    let skip = feed
        .skip
        .as_ref()
        .and_then(|s| feed.column_index(s.column).map(|i| (i, &s.ids)));

    let mut rows = Vec::with_capacity(records.len());
    let mut skipped = 0;
    for record in records {
        let row = map_record(feed, record, exported_at)
            .event(Subsystem::DataIntegrity, "map data")?;
        if let Some((index, ids)) = skip {
            if row[index].as_str().is_some_and(|id| ids.contains(id)) {
                skipped += 1;
                continue;
            }
        }
        rows.push(row);
    }

    let rows = dedup_last_wins(feed, rows);
    let max_modified = feed
        .modified_column
        .and_then(|c| feed.column_index(c))
        .and_then(|i| rows.iter().filter_map(|r| r[i].as_timestamp()).max());

    Ok(MappedPage {
        rows,
        max_modified,
        skipped,
    })
}

/// Map a single record
pub fn map_record(feed: &FeedDescriptor, record: &Value, exported_at: DateTime<Utc>) -> Result<Row> {
    let object = record
        .as_object()
        .ok_or_else(|| Error::mapping(feed.name, format!("expected an object, got {record}")))?;

    feed.columns
        .iter()
        .map(|column| {
            if column.stamped {
                return Ok(Cell::Timestamp(exported_at));
            }
            let value = object.get(column.source).unwrap_or(&Value::Null);
            map_value(column, value).map_err(|message| {
                Error::mapping(feed.name, format!("column {}: {message}", column.name))
            })
        })
        .collect()
}

fn map_value(column: &ColumnDef, value: &Value) -> std::result::Result<Cell, String> {
    if value.is_null() {
        return Ok(absent(column));
    }

    match column.kind {
        ColumnKind::Text => match value {
            Value::String(s) => Ok(Cell::Text(s.clone())),
            Value::Object(_) | Value::Array(_) => Ok(Cell::Text(value.to_string())),
            other => Err(format!("expected a string, got {other}")),
        },
        ColumnKind::Integer => value
            .as_i64()
            .map(Cell::Int)
            .ok_or_else(|| format!("expected an integer, got {value}")),
        ColumnKind::Float => value
            .as_f64()
            .map(Cell::Float)
            .ok_or_else(|| format!("expected a number, got {value}")),
        ColumnKind::Bool => value
            .as_bool()
            .map(Cell::Bool)
            .ok_or_else(|| format!("expected a boolean, got {value}")),
        ColumnKind::Timestamp => match value {
            Value::String(s) if s.is_empty() => Ok(Cell::Null),
            Value::String(s) => parse_timestamp(s)
                .map(Cell::Timestamp)
                .ok_or_else(|| format!("invalid timestamp {s:?}")),
            other => Err(format!("expected a timestamp, got {other}")),
        },
    }
}

/// Value used when the record has none
fn absent(column: &ColumnDef) -> Cell {
    if column.nullable {
        return Cell::Null;
    }
    match column.kind {
        ColumnKind::Text => Cell::Text(String::new()),
        ColumnKind::Integer => Cell::Int(0),
        ColumnKind::Float => Cell::Float(0.0),
        ColumnKind::Bool => Cell::Bool(false),
        ColumnKind::Timestamp => Cell::Null,
    }
}

/// Parse an RFC 3339 timestamp into UTC
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Primary key of a row as a single string
pub fn row_key(key_indices: &[usize], row: &Row) -> String {
    key_indices
        .iter()
        .map(|&i| row[i].to_string())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Drop all but the last row for each primary key, keeping the order of the
/// rows that remain
pub fn dedup_last_wins(feed: &FeedDescriptor, rows: Vec<Row>) -> Vec<Row> {
    let keys = feed.key_indices();
    if keys.is_empty() {
        return rows;
    }

    let mut seen = HashSet::with_capacity(rows.len());
    let mut kept: Vec<Row> = rows
        .into_iter()
        .rev()
        .filter(|row| seen.insert(row_key(&keys, row)))
        .collect();
    kept.reverse();
    kept
}

/// Rows per statement that keep `columns` placeholders under the limit
///
/// Four parameters per row are held back for the key columns the upsert
/// repeats.
pub fn batch_size(parameter_limit: usize, columns: usize) -> usize {
    (parameter_limit / (columns + 4)).max(1)
}
