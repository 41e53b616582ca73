//! Tests for report rendering

use super::*;
use crate::config::DbConfig;
use crate::error::Error;
use crate::http::{HttpClient, HttpClientConfig};
use crate::sink::SqlSink;
use crate::types::{Dialect, FilenameConvention, ReportFormat};
use chrono::{TimeZone, Utc};
use duckdb::params;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use test_case::test_case;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn client(server: &MockServer) -> HttpClient {
    let config = HttpClientConfig::builder()
        .base_url(server.uri())
        .max_retries(0)
        .timeout(Duration::from_secs(5))
        .build();
    HttpClient::with_config(config).unwrap()
}

/// SQL sink holding a minimal inspections table
fn sink_with(inspections: &[(&str, &str, &str, bool)]) -> Arc<SqlSink> {
    let config = DbConfig {
        dialect: Dialect::Duckdb,
        connection_string: ":memory:".into(),
        auto_migrate: true,
    };
    let sink = SqlSink::connect(&config, "media").unwrap();
    sink.store()
        .with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE inspections (audit_id VARCHAR PRIMARY KEY, name VARCHAR, \
                 modified_at TIMESTAMP, deleted BOOLEAN)",
            )?;
            for (id, name, modified_at, deleted) in inspections {
                conn.execute(
                    "INSERT INTO inspections VALUES (?, ?, CAST(? AS TIMESTAMP), ?)",
                    params![id, name, modified_at, deleted],
                )?;
            }
            Ok(())
        })
        .unwrap();
    Arc::new(sink)
}

fn options(export: &Path, formats: Vec<ReportFormat>) -> ReportOptions {
    ReportOptions {
        formats,
        filename_convention: FilenameConvention::InspectionTitle,
        preference_id: None,
        retry_timeout: 3,
        poll_unit: Duration::from_millis(5),
        incremental: true,
        concurrency: 4,
        output_dir: export.join("reports"),
    }
}

fn files_in(dir: &Path) -> BTreeSet<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

async fn mount_render(server: &MockServer, audit_id: &str, format: &str, status: &str) {
    let message_id = format!("{audit_id}_{format}");
    Mock::given(method("POST"))
        .and(path(format!("/audits/{audit_id}/report")))
        .and(body_partial_json(json!({ "format": format })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messageId": message_id })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/audits/{audit_id}/report/{message_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": status,
            "url": format!("{}/files/{message_id}", server.uri())
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/files/{message_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(format!("{message_id} body")))
        .mount(server)
        .await;
}

// ============================================================================
// Naming
// ============================================================================

#[test_case("My Audit 1", "My-Audit-1" ; "spaces")]
#[test_case("Site / Area", "Site-Area" ; "spaced slash")]
#[test_case("Site // Area", "Site-Area" ; "spaced double slash")]
#[test_case("a/b\\c", "a-b-c" ; "slashes")]
#[test_case("What? <now>", "What---now-" ; "reserved characters")]
#[test_case("Café: día", "Café--día" ; "unicode kept")]
#[test_case("100% done", "100--done" ; "percent")]
fn test_sanitize_name(input: &str, expected: &str) {
    assert_eq!(sanitize_name(input), expected);
}

#[test_case("", "audit_1" ; "empty title")]
#[test_case("  ", "audit_1" ; "blank title")]
#[test_case("Daily check", "Daily-check" ; "title")]
fn test_base_name_by_title(name: &str, expected: &str) {
    let target = ReportTarget {
        audit_id: "audit_1".to_string(),
        name: name.to_string(),
        modified_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    };
    assert_eq!(base_name(&target, FilenameConvention::InspectionTitle), expected);
    assert_eq!(base_name(&target, FilenameConvention::InspectionId), "audit_1");
}

#[test]
fn test_file_name_fits_limit() {
    let long = "a".repeat(300);
    let name = file_name(&long, ReportFormat::Word, 12, MAX_FILE_NAME_BYTES);
    assert_eq!(name.len(), MAX_FILE_NAME_BYTES);
    assert!(name.ends_with(" (12).docx"));

    let name = file_name(&long, ReportFormat::Pdf, 0, 100);
    assert_eq!(name.len(), 100);

    let wide = "é".repeat(200);
    let name = file_name(&wide, ReportFormat::Pdf, 0, MAX_FILE_NAME_BYTES);
    assert!(name.len() <= MAX_FILE_NAME_BYTES);
    assert!(name.ends_with("é.pdf"));
}

#[test]
fn test_long_title_path_fits_limit() {
    let dir = tempdir().unwrap();
    let stem = "x".repeat(400);

    let name = unique_file_name(dir.path(), &stem, ReportFormat::Pdf);
    let path = dir.path().join(&name);
    assert!(path.as_os_str().len() <= MAX_PATH_BYTES);
    assert!(name.ends_with("x.pdf"));

    std::fs::write(&path, b"x").unwrap();
    let next = unique_file_name(dir.path(), &stem, ReportFormat::Pdf);
    assert!(next.ends_with(" (1).pdf"));
    assert!(dir.path().join(next).as_os_str().len() <= MAX_PATH_BYTES);
}

#[test]
fn test_name_budget_has_floor() {
    let deep = Path::new("/").join("d".repeat(300));
    assert_eq!(name_budget(&deep), 32);
    assert_eq!(name_budget(Path::new("")), 249);
}

#[test]
fn test_truncate_bytes_respects_char_boundary() {
    assert_eq!(truncate_bytes("héllo", 2), "h");
    assert_eq!(truncate_bytes("héllo", 3), "hé");
    assert_eq!(truncate_bytes("abc", 10), "abc");
}

#[test]
fn test_unique_file_name_appends_counter() {
    let dir = tempdir().unwrap();
    assert_eq!(unique_file_name(dir.path(), "My-Audit-1", ReportFormat::Pdf), "My-Audit-1.pdf");

    std::fs::write(dir.path().join("My-Audit-1.pdf"), b"x").unwrap();
    assert_eq!(
        unique_file_name(dir.path(), "My-Audit-1", ReportFormat::Pdf),
        "My-Audit-1 (1).pdf"
    );

    std::fs::write(dir.path().join("My-Audit-1 (1).pdf"), b"x").unwrap();
    assert_eq!(
        unique_file_name(dir.path(), "My-Audit-1", ReportFormat::Pdf),
        "My-Audit-1 (2).pdf"
    );
}

// ============================================================================
// Job types
// ============================================================================

#[test_case(0, 1 ; "start")]
#[test_case(19, 1 ; "first window")]
#[test_case(20, 2 ; "second window")]
#[test_case(45, 3 ; "third window")]
#[test_case(60, 4 ; "capped")]
#[test_case(600, 4 ; "stays capped")]
fn test_poll_wait(elapsed_secs: u64, expected_secs: u64) {
    let unit = Duration::from_secs(1);
    assert_eq!(
        poll_wait(Duration::from_secs(elapsed_secs), unit),
        Duration::from_secs(expected_secs)
    );
}

#[test]
fn test_poll_wait_scales_with_unit() {
    let unit = Duration::from_millis(10);
    assert_eq!(poll_wait(Duration::from_millis(250), unit), Duration::from_millis(20));
}

#[test]
fn test_job_state_terminal() {
    assert!(!JobState::Pending.is_terminal());
    assert!(!JobState::Polling {
        message_id: "m".into(),
        elapsed: Duration::ZERO
    }
    .is_terminal());
    assert!(JobState::Expired {
        elapsed: Duration::from_secs(15)
    }
    .is_failure());
    assert!(!JobState::Succeeded {
        file_name: "a.pdf".into()
    }
    .is_failure());
}

// ============================================================================
// Exporter
// ============================================================================

#[test]
fn test_targets_skip_deleted_inspections() {
    let sink = sink_with(&[
        ("audit_2", "Second", "2024-01-02 00:00:00", false),
        ("audit_1", "First", "2024-01-01 00:00:00", false),
        ("audit_gone", "Gone", "2024-01-03 00:00:00", true),
    ]);
    let dir = tempdir().unwrap();
    let http = HttpClient::with_config(HttpClientConfig::builder().base_url("http://localhost").build()).unwrap();
    let exporter = ReportExporter::new(http, sink, options(dir.path(), vec![ReportFormat::Pdf]));

    let ids: Vec<String> = exporter.targets().unwrap().into_iter().map(|t| t.audit_id).collect();
    assert_eq!(ids, vec!["audit_1", "audit_2"]);
}

#[tokio::test]
async fn test_same_titles_get_distinct_files() {
    let server = MockServer::start().await;
    for id in ["audit_1", "audit_2"] {
        mount_render(&server, id, "PDF", "SUCCESS").await;
    }
    let sink = sink_with(&[
        ("audit_1", "My Audit 1", "2024-01-01 00:00:00", false),
        ("audit_2", "My Audit 1", "2024-01-02 00:00:00", false),
    ]);
    let dir = tempdir().unwrap();

    let summary = ReportExporter::new(client(&server), sink, options(dir.path(), vec![ReportFormat::Pdf]))
        .export()
        .await
        .unwrap();

    assert_eq!(summary.pdf_saved, 2);
    let reports = dir.path().join("reports");
    assert_eq!(
        files_in(&reports),
        BTreeSet::from(["My-Audit-1 (1).pdf".to_string(), "My-Audit-1.pdf".to_string()])
    );
    let mut bodies: Vec<String> = files_in(&reports)
        .iter()
        .map(|f| std::fs::read_to_string(reports.join(f)).unwrap())
        .collect();
    bodies.sort();
    assert_eq!(bodies, vec!["audit_1_PDF body", "audit_2_PDF body"]);
    for file in files_in(&reports) {
        assert!(reports.join(file).as_os_str().len() <= MAX_PATH_BYTES);
    }
}

/// Serves a report body after dropping the bookkeeping table
struct DropRecordsThenServe {
    sink: Arc<SqlSink>,
}

impl Respond for DropRecordsThenServe {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.sink
            .store()
            .with_conn(|conn| Ok(conn.execute_batch(&format!("DROP TABLE {REPORT_EXPORTS_TABLE}"))?))
            .unwrap();
        ResponseTemplate::new(200).set_body_bytes("audit_1_PDF body")
    }
}

#[tokio::test]
async fn test_bookkeeping_failure_waits_for_running_jobs() {
    let server = MockServer::start().await;
    let sink = sink_with(&[
        ("audit_1", "First", "2024-01-01 00:00:00", false),
        ("audit_2", "Second", "2024-01-02 00:00:00", false),
    ]);
    for id in ["audit_1", "audit_2"] {
        let message_id = format!("{id}_PDF");
        Mock::given(method("POST"))
            .and(path(format!("/audits/{id}/report")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messageId": message_id })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/audits/{id}/report/{message_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "SUCCESS",
                "url": format!("{}/files/{message_id}", server.uri())
            })))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/files/audit_1_PDF"))
        .respond_with(DropRecordsThenServe { sink: Arc::clone(&sink) })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/audit_2_PDF"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes("audit_2_PDF body")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    let dir = tempdir().unwrap();

    let err = ReportExporter::new(client(&server), sink, options(dir.path(), vec![ReportFormat::Pdf]))
        .export()
        .await
        .unwrap_err();

    assert!(!matches!(err, Error::ReportsFailed { .. }));
    assert_eq!(
        files_in(&dir.path().join("reports")),
        BTreeSet::from(["First.pdf".to_string(), "Second.pdf".to_string()])
    );
}

#[tokio::test]
async fn test_preference_id_sent_with_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audits/audit_1/report"))
        .and(body_partial_json(json!({ "format": "WORD", "preference_id": "pref_9" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messageId": "audit_1_WORD" })))
        .expect(1)
        .mount(&server)
        .await;
    mount_render(&server, "audit_1", "WORD", "SUCCESS").await;

    let sink = sink_with(&[("audit_1", "Weekly", "2024-01-01 00:00:00", false)]);
    let dir = tempdir().unwrap();
    let mut opts = options(dir.path(), vec![ReportFormat::Word]);
    opts.preference_id = Some("pref_9".to_string());

    let summary = ReportExporter::new(client(&server), sink, opts).export().await.unwrap();

    assert_eq!(summary.word_saved, 1);
    assert!(dir.path().join("reports/Weekly.docx").exists());
}

#[tokio::test]
async fn test_stuck_renders_expire_and_are_counted() {
    let server = MockServer::start().await;
    let ids = ["audit_1", "audit_2", "audit_3"];
    for id in ids {
        mount_render(&server, id, "PDF", "IN_PROGRESS").await;
        mount_render(&server, id, "WORD", "SUCCESS").await;
    }
    let sink = sink_with(&[
        ("audit_1", "One", "2024-01-01 00:00:00", false),
        ("audit_2", "Two", "2024-01-02 00:00:00", false),
        ("audit_3", "Three", "2024-01-03 00:00:00", false),
    ]);
    let dir = tempdir().unwrap();

    let err = ReportExporter::new(
        client(&server),
        sink,
        options(dir.path(), vec![ReportFormat::Pdf, ReportFormat::Word]),
    )
    .export()
    .await
    .unwrap_err();

    assert!(matches!(err, Error::ReportsFailed { pdf: 3, word: 0 }));
    assert_eq!(err.to_string(), "Failed to generate 3 PDF reports and 0 WORD reports");
    // WORD jobs still ran to completion
    assert_eq!(
        files_in(&dir.path().join("reports")),
        BTreeSet::from(["One.docx".to_string(), "Three.docx".to_string(), "Two.docx".to_string()])
    );

    // 3 poll units of budget, one unit per poll
    let polls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/audits/audit_1/report/audit_1_PDF")
        .count();
    assert_eq!(polls, 3);
}

#[tokio::test]
async fn test_server_side_failure_is_terminal() {
    let server = MockServer::start().await;
    mount_render(&server, "audit_1", "PDF", "FAILED").await;
    Mock::given(method("POST"))
        .and(path("/audits/audit_2/report"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let sink = sink_with(&[
        ("audit_1", "One", "2024-01-01 00:00:00", false),
        ("audit_2", "Two", "2024-01-02 00:00:00", false),
    ]);
    let dir = tempdir().unwrap();

    let err = ReportExporter::new(client(&server), sink, options(dir.path(), vec![ReportFormat::Pdf]))
        .export()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ReportsFailed { pdf: 2, word: 0 }));
    assert!(files_in(&dir.path().join("reports")).is_empty());
}

#[tokio::test]
async fn test_incremental_run_skips_current_reports() {
    let sink = sink_with(&[("audit_1", "Daily", "2024-01-01 08:00:00", false)]);
    let dir = tempdir().unwrap();

    let first = MockServer::start().await;
    mount_render(&first, "audit_1", "PDF", "SUCCESS").await;
    let summary = ReportExporter::new(client(&first), Arc::clone(&sink), options(dir.path(), vec![ReportFormat::Pdf]))
        .export()
        .await
        .unwrap();
    assert_eq!(summary.pdf_saved, 1);

    let idle = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&idle)
        .await;
    let summary = ReportExporter::new(client(&idle), Arc::clone(&sink), options(dir.path(), vec![ReportFormat::Pdf]))
        .export()
        .await
        .unwrap();
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.pdf_saved, 0);

    // A missing file is rendered again under the same name
    std::fs::remove_file(dir.path().join("reports/Daily.pdf")).unwrap();
    let again = MockServer::start().await;
    mount_render(&again, "audit_1", "PDF", "SUCCESS").await;
    let summary = ReportExporter::new(client(&again), sink, options(dir.path(), vec![ReportFormat::Pdf]))
        .export()
        .await
        .unwrap();
    assert_eq!(summary.pdf_saved, 1);
    assert_eq!(files_in(&dir.path().join("reports")), BTreeSet::from(["Daily.pdf".to_string()]));
}

#[tokio::test]
async fn test_changed_inspection_replaces_old_report() {
    let sink = sink_with(&[("audit_1", "Daily", "2024-01-01 08:00:00", false)]);
    let dir = tempdir().unwrap();
    let server = MockServer::start().await;
    mount_render(&server, "audit_1", "PDF", "SUCCESS").await;

    ReportExporter::new(client(&server), Arc::clone(&sink), options(dir.path(), vec![ReportFormat::Pdf]))
        .export()
        .await
        .unwrap();
    sink.store()
        .with_conn(|conn| {
            conn.execute_batch(
                "UPDATE inspections SET modified_at = TIMESTAMP '2024-01-05 08:00:00' WHERE audit_id = 'audit_1'",
            )?;
            Ok(())
        })
        .unwrap();

    let summary = ReportExporter::new(client(&server), sink, options(dir.path(), vec![ReportFormat::Pdf]))
        .export()
        .await
        .unwrap();

    assert_eq!(summary.pdf_saved, 1);
    assert_eq!(summary.unchanged, 0);
    assert_eq!(files_in(&dir.path().join("reports")), BTreeSet::from(["Daily.pdf".to_string()]));
}

#[tokio::test]
async fn test_empty_format_list_rejected() {
    let sink = sink_with(&[]);
    let dir = tempdir().unwrap();
    let http = HttpClient::with_config(HttpClientConfig::builder().base_url("http://localhost").build()).unwrap();

    let err = ReportExporter::new(http, sink, options(dir.path(), vec![]))
        .export()
        .await
        .unwrap_err();

    assert!(err.to_string().contains("No valid export format specified"));
}
