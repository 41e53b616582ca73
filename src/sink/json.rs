//! Per-record JSON file sink and its last-modified marker

use super::media::write_media_file;
use super::{InitFeedOptions, StorageSink};
use crate::error::{Error, Result};
use crate::feed::{Cell, FeedDescriptor, Row};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, Span};

/// Name of the marker file inside its directory
pub const MARKER_FILE: &str = "last-modified";

/// Sidecar file holding the modification time an export has reached
///
/// The file holds one RFC 3339 timestamp with nanoseconds. It is replaced by
/// writing a temp file and renaming it over the old one. Only one process
/// may use a marker at a time.
#[derive(Debug, Clone)]
pub struct LastModifiedMarker {
    path: PathBuf,
}

impl LastModifiedMarker {
    /// Marker stored as `{dir}/last-modified`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(MARKER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored time; a missing or empty file is `None`
    pub async fn load(&self) -> Result<Option<DateTime<Utc>>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::storage(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(trimmed)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|e| Error::decode(format!("invalid time in {}: {e}", self.path.display())))
    }

    /// `max(floor, stored)`
    pub async fn resolve(&self, floor: DateTime<Utc>) -> Result<DateTime<Utc>> {
        Ok(self.load().await?.map_or(floor, |ts| ts.max(floor)))
    }

    /// Replace the stored time
    pub async fn save(&self, ts: DateTime<Utc>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let contents = ts.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, contents)
            .await
            .map_err(|e| Error::storage(format!("Failed to write marker file: {e}")))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::storage(format!("Failed to rename marker file: {e}")))?;
        Ok(())
    }

    /// Save `ts` unless the stored time is already later
    pub async fn advance(&self, ts: DateTime<Utc>) -> Result<()> {
        if self.load().await?.is_some_and(|current| current >= ts) {
            return Ok(());
        }
        self.save(ts).await
    }

    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

fn cell_to_json(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Text(s) => Value::String(s.clone()),
        Cell::Int(i) => Value::from(*i),
        Cell::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Cell::Bool(b) => Value::Bool(*b),
        Cell::Timestamp(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
    }
}

fn json_matches(value: &Value, wanted: &[String]) -> bool {
    match value {
        Value::String(s) => wanted.iter().any(|w| w == s),
        Value::Null => false,
        other => {
            let s = other.to_string();
            wanted.iter().any(|w| *w == s)
        }
    }
}

/// File stem for a record key; path separators are replaced
fn file_stem(parts: &[String]) -> String {
    parts
        .join("__")
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}

/// Writes every record as its own JSON file
///
/// Feed rows go to `{root}/{feed}/{key}.json` with a marker per feed
/// directory. Whole documents written with [`JsonSink::write_document`] go to
/// `{root}/{name}.json`.
#[derive(Debug)]
pub struct JsonSink {
    root: PathBuf,
    media_path: PathBuf,
    span: Span,
}

impl JsonSink {
    pub fn new(root: impl Into<PathBuf>, media_path: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            media_path: media_path.into(),
            span: Span::none(),
        }
    }

    /// Parent log events on `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn feed_dir(&self, feed: &FeedDescriptor) -> PathBuf {
        self.root.join(feed.name)
    }

    /// Watermark marker of a feed
    pub fn marker(&self, feed: &FeedDescriptor) -> LastModifiedMarker {
        LastModifiedMarker::new(self.feed_dir(feed))
    }

    /// Path of the record file for a row
    pub fn record_path(&self, feed: &FeedDescriptor, row: &Row) -> PathBuf {
        let parts: Vec<String> = feed.key_indices().iter().map(|&i| row[i].to_string()).collect();
        self.feed_dir(feed).join(format!("{}.json", file_stem(&parts)))
    }

    /// Write a whole document as `{root}/{name}.json`
    pub async fn write_document(&self, name: &str, document: &Value) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(format!("{}.json", file_stem(&[name.to_string()])));
        let contents = serde_json::to_vec_pretty(document)?;
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    async fn record_files(&self, feed: &FeedDescriptor) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.feed_dir(feed)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn read_record(path: &Path) -> Result<Map<String, Value>> {
        let contents = tokio::fs::read(path).await?;
        match serde_json::from_slice(&contents)? {
            Value::Object(map) => Ok(map),
            _ => Err(Error::decode(format!("{} is not a JSON object", path.display()))),
        }
    }

    async fn write_record(path: &Path, record: Map<String, Value>) -> Result<()> {
        let contents = serde_json::to_vec_pretty(&Value::Object(record))?;
        tokio::fs::write(path, contents).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageSink for JsonSink {
    fn kind(&self) -> &'static str {
        "json"
    }

    /// Rewriting a record file replaces it
    fn supports_upsert(&self) -> bool {
        true
    }

    fn parameter_limit(&self) -> usize {
        usize::MAX
    }

    async fn init_feed(&self, feed: &FeedDescriptor, options: InitFeedOptions) -> Result<()> {
        let dir = self.feed_dir(feed);
        if options.truncate {
            match tokio::fs::remove_dir_all(&dir).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn create_schema(&self, feed: &FeedDescriptor) -> Result<()> {
        tokio::fs::create_dir_all(self.feed_dir(feed)).await?;
        Ok(())
    }

    async fn write_rows(&self, feed: &FeedDescriptor, rows: &[Row]) -> Result<usize> {
        if feed.key_indices().is_empty() {
            return Err(Error::storage(format!(
                "{} has no primary key to name its record files",
                feed.name
            )));
        }
        tokio::fs::create_dir_all(self.feed_dir(feed)).await?;

        for row in rows {
            let record: Map<String, Value> = feed
                .columns
                .iter()
                .zip(row)
                .map(|(column, cell)| (column.name.to_string(), cell_to_json(cell)))
                .collect();
            Self::write_record(&self.record_path(feed, row), record).await?;
        }
        Ok(rows.len())
    }

    async fn delete_rows(
        &self,
        feed: &FeedDescriptor,
        column: &str,
        values: &[String],
    ) -> Result<usize> {
        if values.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0;
        for path in self.record_files(feed).await? {
            let record = Self::read_record(&path).await?;
            if record.get(column).is_some_and(|v| json_matches(v, values)) {
                tokio::fs::remove_file(&path).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn update_rows(
        &self,
        feed: &FeedDescriptor,
        keys: &[String],
        column: &str,
        value: Cell,
    ) -> Result<usize> {
        if feed.primary_key.len() != 1 {
            return Err(Error::storage(format!(
                "cannot update {} by key: it needs a single-column primary key",
                feed.name
            )));
        }

        let mut updated = 0;
        for key in keys {
            let path = self.feed_dir(feed).join(format!("{}.json", file_stem(&[key.clone()])));
            if !path.exists() {
                continue;
            }
            let mut record = Self::read_record(&path).await?;
            record.insert(column.to_string(), cell_to_json(&value));
            Self::write_record(&path, record).await?;
            updated += 1;
        }
        Ok(updated)
    }

    /// The marker is per directory, so `org_id` does not narrow it
    async fn last_modified_at(
        &self,
        feed: &FeedDescriptor,
        floor: DateTime<Utc>,
        _org_id: &str,
    ) -> Result<DateTime<Utc>> {
        self.marker(feed).resolve(floor).await
    }

    async fn advance_watermark(
        &self,
        feed: &FeedDescriptor,
        _org_id: &str,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        self.marker(feed).advance(ts).await
    }

    async fn finalise_export(&self, feed: &FeedDescriptor) -> Result<()> {
        let records = self.record_files(feed).await?.len();
        debug!(parent: &self.span, feed = feed.name, records, "json export complete");
        Ok(())
    }

    async fn write_media(
        &self,
        audit_id: &str,
        media_id: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<()> {
        write_media_file(&self.media_path, audit_id, media_id, content_type, body).await?;
        Ok(())
    }
}
