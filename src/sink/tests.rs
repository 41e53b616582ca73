//! Tests for the storage sinks

use super::*;
use crate::config::DbConfig;
use crate::feed::{boolean, int, text, timestamp, FeedDescriptor, TruncatePolicy};
use crate::types::Dialect;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;

fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 9, 30, 0).unwrap()
}

fn users_feed() -> FeedDescriptor {
    FeedDescriptor::new("users", "/feed/users")
        .columns([
            text("user_id").key("id"),
            text("organisation_id"),
            text("firstname"),
            boolean("active"),
            timestamp("last_seen_at").nullable(),
        ])
        .primary_key(&["user_id"])
        .order("user_id")
}

fn templates_feed() -> FeedDescriptor {
    FeedDescriptor::new("templates", "/feed/templates")
        .columns([
            text("template_id").key("id"),
            text("organisation_id"),
            text("name"),
            int("version").nullable(),
            timestamp("modified_at"),
        ])
        .primary_key(&["template_id"])
        .order("modified_at, template_id")
        .incremental("modified_at")
}

fn user(id: &str, name: &str) -> Row {
    vec![
        Cell::Text(id.into()),
        Cell::Text("role_123".into()),
        Cell::Text(name.into()),
        Cell::Bool(true),
        Cell::Null,
        Cell::Timestamp(ts(1)),
    ]
}

fn template(id: &str, modified: DateTime<Utc>) -> Row {
    vec![
        Cell::Text(id.into()),
        Cell::Text("role_123".into()),
        Cell::Text(format!("Template {id}")),
        Cell::Int(1),
        Cell::Timestamp(modified),
        Cell::Timestamp(ts(1)),
    ]
}

fn duckdb_sink() -> SqlSink {
    let config = DbConfig {
        dialect: Dialect::Duckdb,
        connection_string: ":memory:".into(),
        auto_migrate: true,
    };
    SqlSink::connect(&config, "media").unwrap()
}

fn firstnames(sink: &SqlSink) -> Vec<(String, String)> {
    sink.store()
        .with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT user_id, firstname FROM users ORDER BY user_id")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<duckdb::Result<Vec<(String, String)>>>()?)
        })
        .unwrap()
}

// ============================================================================
// SQL generation
// ============================================================================

#[test]
fn test_create_table_sql_marks_key_columns() {
    let sql = create_table_sql(&users_feed());
    assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"users\""));
    assert!(sql.contains("\"user_id\" VARCHAR NOT NULL"));
    assert!(sql.contains("\"last_seen_at\" TIMESTAMP,"));
    assert!(sql.ends_with("PRIMARY KEY (\"user_id\"))"));
}

#[test]
fn test_upsert_sql_updates_value_columns() {
    let sql = upsert_sql(&users_feed(), 2);
    assert!(sql.contains("ON CONFLICT (\"user_id\") DO UPDATE SET"));
    assert!(sql.contains("\"firstname\" = excluded.\"firstname\""));
    assert!(!sql.contains("\"user_id\" = excluded"));
    assert_eq!(sql.matches("CAST(? AS TIMESTAMP)").count(), 4);
}

#[test]
fn test_upsert_sql_without_value_columns_does_nothing() {
    let feed = FeedDescriptor::new("pairs", "/feed/pairs")
        .columns([text("a"), text("b")])
        .primary_key(&["a", "b", "exported_at"]);
    assert!(upsert_sql(&feed, 1).ends_with("DO NOTHING"));
}

// ============================================================================
// SQL sink
// ============================================================================

#[tokio::test]
async fn test_sql_upsert_keeps_latest_values() {
    let sink = duckdb_sink();
    let feed = users_feed();
    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();

    sink.write_rows(&feed, &[user("user_1", "User 1")]).await.unwrap();
    sink.write_rows(&feed, &[user("user_1", "User One"), user("user_2", "User 2")])
        .await
        .unwrap();

    assert_eq!(
        firstnames(&sink),
        vec![
            ("user_1".to_string(), "User One".to_string()),
            ("user_2".to_string(), "User 2".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_sql_truncate_clears_rows_and_watermark() {
    let sink = duckdb_sink();
    let feed = templates_feed();
    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();
    sink.write_rows(&feed, &[template("t1", ts(5))]).await.unwrap();
    sink.advance_watermark(&feed, "role_123", ts(5)).await.unwrap();

    sink.init_feed(&feed, InitFeedOptions { truncate: true }).await.unwrap();

    assert_eq!(sink.store().count(&feed).unwrap(), 0);
    assert_eq!(
        sink.last_modified_at(&feed, ts(1), "role_123").await.unwrap(),
        ts(1)
    );
}

#[tokio::test]
async fn test_sql_last_modified_never_below_floor() {
    let sink = duckdb_sink();
    let feed = templates_feed();
    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();

    // Empty table
    assert_eq!(sink.last_modified_at(&feed, ts(3), "role_123").await.unwrap(), ts(3));

    sink.advance_watermark(&feed, "role_123", ts(10)).await.unwrap();
    assert_eq!(sink.last_modified_at(&feed, ts(3), "role_123").await.unwrap(), ts(10));
    assert_eq!(sink.last_modified_at(&feed, ts(20), "role_123").await.unwrap(), ts(20));
    assert_eq!(sink.last_modified_at(&feed, ts(3), "role_999").await.unwrap(), ts(3));
}

#[tokio::test]
async fn test_sql_watermark_never_regresses() {
    let sink = duckdb_sink();
    let feed = templates_feed();
    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();

    sink.advance_watermark(&feed, "role_123", ts(10)).await.unwrap();
    sink.advance_watermark(&feed, "role_123", ts(4)).await.unwrap();

    assert_eq!(
        sink.store().watermark("templates", "role_123").unwrap(),
        Some(ts(10))
    );
}

#[tokio::test]
async fn test_sql_without_migration_requires_table() {
    let config = DbConfig {
        dialect: Dialect::Duckdb,
        connection_string: ":memory:".into(),
        auto_migrate: false,
    };
    let sink = SqlSink::connect(&config, "media").unwrap();

    let err = sink
        .init_feed(&users_feed(), InitFeedOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("auto migration is disabled"));
}

#[tokio::test]
async fn test_sql_without_migration_reads_column_max() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("export.duckdb");
    let feed = templates_feed();

    {
        let config = DbConfig {
            dialect: Dialect::Duckdb,
            connection_string: path.to_string_lossy().into_owned(),
            auto_migrate: true,
        };
        let sink = SqlSink::connect(&config, "media").unwrap();
        sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();
        sink.write_rows(&feed, &[template("t1", ts(7)), template("t2", ts(12))])
            .await
            .unwrap();
    }

    let config = DbConfig {
        dialect: Dialect::Duckdb,
        connection_string: path.to_string_lossy().into_owned(),
        auto_migrate: false,
    };
    let sink = SqlSink::connect(&config, "media").unwrap();
    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();

    assert_eq!(sink.last_modified_at(&feed, ts(1), "role_123").await.unwrap(), ts(12));
    assert_eq!(sink.last_modified_at(&feed, ts(1), "role_999").await.unwrap(), ts(1));
}

#[tokio::test]
async fn test_sql_delete_and_update_rows() {
    let sink = duckdb_sink();
    let feed = users_feed();
    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();
    sink.write_rows(&feed, &[user("user_1", "A"), user("user_2", "B"), user("user_3", "C")])
        .await
        .unwrap();

    let deleted = sink
        .delete_rows(&feed, "user_id", &["user_2".to_string()])
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let updated = sink
        .update_rows(&feed, &["user_3".to_string(), "missing".to_string()], "firstname", Cell::Text("Z".into()))
        .await
        .unwrap();
    assert_eq!(updated, 1);

    assert_eq!(
        firstnames(&sink),
        vec![
            ("user_1".to_string(), "A".to_string()),
            ("user_3".to_string(), "Z".to_string()),
        ]
    );
}

#[test]
fn test_sqlserver_is_rejected() {
    let config = DbConfig {
        dialect: Dialect::Sqlserver,
        connection_string: "sqlserver://localhost".into(),
        auto_migrate: true,
    };
    let err = SqlSink::connect(&config, "media").unwrap_err();
    assert!(err.to_string().contains("sqlserver"));
}

#[test]
fn test_write_splits_into_parameter_limited_statements() {
    let store = DuckStore::in_memory(WriteMode::Upsert).unwrap();
    let feed = users_feed();
    store.ensure_table(&feed).unwrap();

    let rows: Vec<Row> = (0..25).map(|i| user(&format!("user_{i:02}"), "U")).collect();
    // 6 columns + 4 per row: 20 parameters fit two rows per statement
    let written = store.write(&feed, &rows, 20).unwrap();

    assert_eq!(written, 25);
    assert_eq!(store.count(&feed).unwrap(), 25);
}

#[test]
fn test_delete_insert_replaces_existing_keys() {
    let store = DuckStore::in_memory(WriteMode::DeleteInsert).unwrap();
    let feed = users_feed();
    store.ensure_table(&feed).unwrap();

    store.write(&feed, &[user("user_1", "User 1")], 65536).unwrap();
    store.write(&feed, &[user("user_1", "User One")], 65536).unwrap();

    let name: String = store
        .with_conn(|conn| Ok(conn.query_row("SELECT firstname FROM users", [], |r| r.get(0))?))
        .unwrap();
    assert_eq!(store.count(&feed).unwrap(), 1);
    assert_eq!(name, "User One");
}

// ============================================================================
// CSV sink
// ============================================================================

#[test]
fn test_csv_file_names() {
    assert_eq!(csv_file_names("users", 0, 2), vec!["users.csv"]);
    assert_eq!(csv_file_names("users", 2, 2), vec!["users.csv"]);
    assert_eq!(csv_file_names("users", 3, 2), vec!["users-00001.csv", "users-00002.csv"]);
    assert_eq!(csv_file_names("users", 5, 0).len(), 5);
}

#[tokio::test]
async fn test_csv_rotation_at_max_rows() {
    let dir = tempdir().unwrap();
    let sink = CsvSink::open(dir.path(), dir.path().join("media"), 2).unwrap();
    let feed = users_feed();

    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();
    sink.write_rows(&feed, &[user("user_1", "A"), user("user_2", "B"), user("user_3", "C")])
        .await
        .unwrap();
    sink.finalise_export(&feed).await.unwrap();

    let first = std::fs::read_to_string(dir.path().join("users-00001.csv")).unwrap();
    let second = std::fs::read_to_string(dir.path().join("users-00002.csv")).unwrap();
    assert!(!dir.path().join("users.csv").exists());

    let first: Vec<&str> = first.lines().collect();
    let second: Vec<&str> = second.lines().collect();
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 2);
    assert!(first[0].starts_with("user_id,organisation_id,firstname"));
    assert!(second[0].starts_with("user_id,organisation_id,firstname"));
    assert!(first[1].starts_with("user_1,"));
    assert!(second[1].starts_with("user_3,"));
}

#[tokio::test]
async fn test_csv_rerun_replaces_rotated_files() {
    let dir = tempdir().unwrap();
    let sink = CsvSink::open(dir.path(), dir.path().join("media"), 2).unwrap();
    let feed = users_feed();

    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();
    sink.write_rows(&feed, &[user("user_1", "A"), user("user_2", "B"), user("user_3", "C")])
        .await
        .unwrap();
    sink.finalise_export(&feed).await.unwrap();

    sink.init_feed(&feed, InitFeedOptions { truncate: true }).await.unwrap();
    sink.write_rows(&feed, &[user("user_9", "Z")]).await.unwrap();
    sink.finalise_export(&feed).await.unwrap();

    let contents = std::fs::read_to_string(dir.path().join("users.csv")).unwrap();
    assert_eq!(contents.lines().count(), 2);
    assert!(!dir.path().join("users-00001.csv").exists());
    assert!(!dir.path().join("users-00002.csv").exists());
}

#[tokio::test]
async fn test_csv_schema_only_writes_header() {
    let dir = tempdir().unwrap();
    let sink = CsvSink::open(dir.path(), dir.path().join("media"), 10).unwrap();

    sink.create_schema(&users_feed()).await.unwrap();

    let contents = std::fs::read_to_string(dir.path().join("users.csv")).unwrap();
    assert_eq!(
        contents.trim_end(),
        "user_id,organisation_id,firstname,active,last_seen_at,exported_at"
    );
}

#[tokio::test]
async fn test_csv_sink_never_upserts() {
    let dir = tempdir().unwrap();
    let sink = CsvSink::open(dir.path(), dir.path().join("media"), 10).unwrap();

    assert!(!sink.supports_upsert());
    assert!(users_feed().truncate_before_sync(crate::types::SyncMode::Incremental, false));
    assert_eq!(templates_feed().truncate, TruncatePolicy::WhenFullRefresh);
}

// ============================================================================
// JSON sink
// ============================================================================

#[tokio::test]
async fn test_marker_missing_file_is_none() {
    let dir = tempdir().unwrap();
    let marker = LastModifiedMarker::new(dir.path());

    assert_eq!(marker.load().await.unwrap(), None);
    assert_eq!(marker.resolve(ts(2)).await.unwrap(), ts(2));
}

#[tokio::test]
async fn test_marker_save_is_rfc3339_nanos() {
    let dir = tempdir().unwrap();
    let marker = LastModifiedMarker::new(dir.path());

    let at = Utc.timestamp_nanos(1_700_000_000_123_456_789);
    marker.save(at).await.unwrap();

    let contents = std::fs::read_to_string(dir.path().join("last-modified")).unwrap();
    assert_eq!(contents, "2023-11-14T22:13:20.123456789Z");
    assert_eq!(marker.load().await.unwrap(), Some(at));
    assert!(!dir.path().join("last-modified.tmp").exists());
}

#[tokio::test]
async fn test_marker_advance_and_resolve() {
    let dir = tempdir().unwrap();
    let marker = LastModifiedMarker::new(dir.path());

    marker.advance(ts(10)).await.unwrap();
    marker.advance(ts(5)).await.unwrap();

    assert_eq!(marker.load().await.unwrap(), Some(ts(10)));
    assert_eq!(marker.resolve(ts(20)).await.unwrap(), ts(20));
    assert_eq!(marker.resolve(ts(1)).await.unwrap(), ts(10));
}

#[tokio::test]
async fn test_marker_rejects_garbage() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("last-modified"), "yesterday").unwrap();

    let marker = LastModifiedMarker::new(dir.path());
    assert!(marker.load().await.is_err());
}

#[tokio::test]
async fn test_json_sink_writes_one_file_per_record() {
    let dir = tempdir().unwrap();
    let sink = JsonSink::new(dir.path(), dir.path().join("media"));
    let feed = users_feed();

    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();
    sink.write_rows(&feed, &[user("user_1", "User 1")]).await.unwrap();
    sink.write_rows(&feed, &[user("user_1", "User One")]).await.unwrap();

    let contents = std::fs::read_to_string(dir.path().join("users/user_1.json")).unwrap();
    let record: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(record["firstname"], json!("User One"));
    assert_eq!(record["active"], json!(true));
    assert_eq!(record["last_seen_at"], json!(null));
    assert_eq!(record["exported_at"], json!("2024-03-01T09:30:00.000000Z"));
}

#[tokio::test]
async fn test_json_sink_delete_and_update() {
    let dir = tempdir().unwrap();
    let sink = JsonSink::new(dir.path(), dir.path().join("media"));
    let feed = users_feed();

    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();
    sink.write_rows(&feed, &[user("user_1", "A"), user("user_2", "B")])
        .await
        .unwrap();

    let updated = sink
        .update_rows(&feed, &["user_2".to_string()], "active", Cell::Bool(false))
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let deleted = sink
        .delete_rows(&feed, "user_id", &["user_1".to_string()])
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    assert!(!dir.path().join("users/user_1.json").exists());
    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("users/user_2.json")).unwrap())
            .unwrap();
    assert_eq!(record["active"], json!(false));
}

#[tokio::test]
async fn test_json_sink_truncate_clears_marker() {
    let dir = tempdir().unwrap();
    let sink = JsonSink::new(dir.path(), dir.path().join("media"));
    let feed = templates_feed();

    sink.init_feed(&feed, InitFeedOptions::default()).await.unwrap();
    sink.write_rows(&feed, &[template("t1", ts(8))]).await.unwrap();
    sink.advance_watermark(&feed, "role_123", ts(8)).await.unwrap();
    assert_eq!(sink.last_modified_at(&feed, ts(1), "role_123").await.unwrap(), ts(8));

    sink.init_feed(&feed, InitFeedOptions { truncate: true }).await.unwrap();

    assert_eq!(sink.last_modified_at(&feed, ts(1), "role_123").await.unwrap(), ts(1));
    assert!(!dir.path().join("templates/t1.json").exists());
}

#[tokio::test]
async fn test_json_write_document() {
    let dir = tempdir().unwrap();
    let sink = JsonSink::new(dir.path(), dir.path().join("media"));

    let path = sink
        .write_document("audit_1", &json!({"audit_id": "audit_1", "items": []}))
        .await
        .unwrap();

    assert_eq!(path, dir.path().join("audit_1.json"));
    let doc: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(doc["audit_id"], json!("audit_1"));
}

// ============================================================================
// Media
// ============================================================================

#[test]
fn test_media_extension() {
    assert_eq!(media_extension("image/jpeg"), "jpeg");
    assert_eq!(media_extension("image/png; charset=binary"), "png");
    assert_eq!(media_extension("application/octet-stream"), "octet-stream");
    assert_eq!(media_extension(""), "bin");
}

#[tokio::test]
async fn test_write_media_places_file_under_inspection() {
    let dir = tempdir().unwrap();
    let sink = CsvSink::open(dir.path(), dir.path().join("media"), 10).unwrap();

    sink.write_media("audit_1", "m1", "image/jpeg", b"jpeg bytes")
        .await
        .unwrap();

    let path = media_path(&dir.path().join("media"), "audit_1", "m1", "image/jpeg");
    assert_eq!(path, dir.path().join("media/audit_1/m1.jpeg"));
    assert_eq!(std::fs::read(path).unwrap(), b"jpeg bytes");
}

#[tokio::test]
async fn test_write_media_needs_ids() {
    let dir = tempdir().unwrap();
    let sink = JsonSink::new(dir.path(), dir.path().join("media"));

    assert!(sink.write_media("", "m1", "image/jpeg", b"x").await.is_err());
}
