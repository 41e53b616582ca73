//! Database integration tests against a DuckDB file
//!
//! Each test opens a database in a temporary directory, so state that
//! outlives a connection (rows, watermarks) is checked across reopen.

use chrono::{DateTime, TimeZone, Utc};
use feed_exporter::config::DbConfig;
use feed_exporter::feed::{text, timestamp, Cell, FeedDescriptor, Row};
use feed_exporter::sink::{InitFeedOptions, SqlSink, StorageSink};
use feed_exporter::types::Dialect;
use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::tempdir;

const ORG: &str = "role_123";

fn open(path: &Path) -> SqlSink {
    let db = DbConfig {
        dialect: Dialect::Duckdb,
        connection_string: path.to_string_lossy().into_owned(),
        auto_migrate: true,
    };
    SqlSink::connect(&db, path.with_file_name("media")).unwrap()
}

fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
}

fn users_feed() -> FeedDescriptor {
    FeedDescriptor::new("users", "/feed/users")
        .columns([
            text("user_id").key("id"),
            text("organisation_id"),
            text("firstname"),
        ])
        .primary_key(&["user_id"])
        .order("user_id")
}

fn actions_feed() -> FeedDescriptor {
    FeedDescriptor::new("actions", "/feed/actions")
        .columns([
            text("action_id").key("id"),
            text("organisation_id"),
            text("title"),
            timestamp("modified_at"),
        ])
        .primary_key(&["action_id"])
        .order("modified_at, action_id")
        .incremental("modified_at")
}

fn user(id: &str, name: &str) -> Row {
    vec![
        Cell::Text(id.into()),
        Cell::Text(ORG.into()),
        Cell::Text(name.into()),
        Cell::Timestamp(ts(1)),
    ]
}

fn action(id: usize, modified: DateTime<Utc>) -> Row {
    vec![
        Cell::Text(format!("action_{id:04}")),
        Cell::Text(ORG.into()),
        Cell::Text(format!("Fix item {id}")),
        Cell::Timestamp(modified),
        Cell::Timestamp(ts(1)),
    ]
}

fn firstnames(sink: &SqlSink) -> Vec<(String, String)> {
    sink.store()
        .with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT user_id, firstname FROM users ORDER BY user_id")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
        })
        .unwrap()
}

#[tokio::test]
async fn test_upsert_keeps_latest_values() {
    let dir = tempdir().unwrap();
    let sink = open(&dir.path().join("export.duckdb"));
    let feed = users_feed();
    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();

    sink.write_rows(&feed, &[user("user_1", "User 1"), user("user_2", "User 2")])
        .await
        .unwrap();
    sink.write_rows(&feed, &[user("user_1", "User One")]).await.unwrap();
    sink.write_rows(&feed, &[user("user_1", "User One")]).await.unwrap();

    assert_eq!(
        firstnames(&sink),
        vec![
            ("user_1".to_string(), "User One".to_string()),
            ("user_2".to_string(), "User 2".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_rows_survive_reopen() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("export.duckdb");
    let feed = users_feed();
    {
        let sink = open(&db);
        sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();
        sink.write_rows(&feed, &[user("user_1", "Ann")]).await.unwrap();
    }

    let sink = open(&db);
    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();
    sink.write_rows(&feed, &[user("user_2", "Ben")]).await.unwrap();

    assert_eq!(sink.store().count(&feed).unwrap(), 2);
}

#[tokio::test]
async fn test_watermark_is_monotonic_and_persistent() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("export.duckdb");
    let feed = actions_feed();
    {
        let sink = open(&db);
        sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();
        sink.advance_watermark(&feed, ORG, ts(10)).await.unwrap();
        sink.advance_watermark(&feed, ORG, ts(4)).await.unwrap();
        assert_eq!(sink.last_modified_at(&feed, ts(1), ORG).await.unwrap(), ts(10));
    }

    let sink = open(&db);
    assert_eq!(sink.last_modified_at(&feed, ts(1), ORG).await.unwrap(), ts(10));
    // The configured floor wins when it is later
    assert_eq!(sink.last_modified_at(&feed, ts(20), ORG).await.unwrap(), ts(20));
    // Other organisations have their own watermark
    assert_eq!(
        sink.last_modified_at(&feed, ts(1), "role_other").await.unwrap(),
        ts(1)
    );
}

#[tokio::test]
async fn test_full_refresh_resets_watermark() {
    let dir = tempdir().unwrap();
    let sink = open(&dir.path().join("export.duckdb"));
    let feed = actions_feed();
    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();
    sink.write_rows(&feed, &[action(1, ts(3))]).await.unwrap();
    sink.advance_watermark(&feed, ORG, ts(3)).await.unwrap();

    sink.init_feed(&feed, InitFeedOptions { truncate: true }).await.unwrap();

    assert_eq!(sink.store().count(&feed).unwrap(), 0);
    assert_eq!(sink.last_modified_at(&feed, ts(1), ORG).await.unwrap(), ts(1));
}

#[tokio::test]
async fn test_large_batch_is_split_under_parameter_limit() {
    let dir = tempdir().unwrap();
    let sink = open(&dir.path().join("export.duckdb"));
    let feed = actions_feed();
    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();

    let rows: Vec<Row> = (0..2_500).map(|i| action(i, ts(1 + (i % 28) as u32))).collect();
    let written = sink
        .store()
        .write(&feed, &rows, 90)
        .unwrap();

    assert_eq!(written, 2_500);
    assert_eq!(sink.store().count(&feed).unwrap(), 2_500);
    assert_eq!(
        sink.store().column_max(&feed, ORG).unwrap(),
        Some(ts(28))
    );
}
