//! Report exporter

use super::naming::{base_name, unique_file_name};
use super::types::{
    poll_wait, CompletionResponse, InitiateResponse, JobState, ReportJob, ReportSummary, ReportTarget,
    STATUS_FAILED, STATUS_SUCCESS,
};
use crate::config::ExporterConfig;
use crate::error::{Error, Result, ResultExt};
use crate::feed::INSPECTIONS;
use crate::http::{HttpClient, RequestConfig};
use crate::sink::{quote, SqlSink};
use crate::types::{FilenameConvention, ReportFormat};
use chrono::DateTime;
use duckdb::params;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Span};

/// Table recording which reports are on disk
pub const REPORT_EXPORTS_TABLE: &str = "report_exports";

/// Report settings resolved from the configuration
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub formats: Vec<ReportFormat>,
    pub filename_convention: FilenameConvention,
    pub preference_id: Option<String>,
    /// Poll budget, in `poll_unit`s
    pub retry_timeout: u64,
    pub poll_unit: Duration,
    pub incremental: bool,
    pub concurrency: usize,
    pub output_dir: PathBuf,
}

impl ReportOptions {
    pub fn from_config(config: &ExporterConfig) -> Self {
        Self {
            formats: config.report.format.clone(),
            filename_convention: config.report.filename_convention,
            preference_id: config.report.preference_id.clone().filter(|p| !p.is_empty()),
            retry_timeout: config.report.retry_timeout,
            poll_unit: Duration::from_secs(1),
            incremental: config.export.incremental,
            concurrency: config.concurrency.max(1),
            output_dir: PathBuf::from(&config.export.path).join("reports"),
        }
    }

    #[must_use]
    pub fn with_poll_unit(mut self, unit: Duration) -> Self {
        self.poll_unit = unit;
        self
    }

    fn timeout(&self) -> Duration {
        self.poll_unit * u32::try_from(self.retry_timeout).unwrap_or(u32::MAX)
    }
}

/// What `report_exports` holds for one job
#[derive(Debug, Clone)]
struct ExportRecord {
    modified_at_us: i64,
    file_name: String,
}

/// Renders and downloads inspection reports
#[derive(Debug)]
pub struct ReportExporter {
    client: HttpClient,
    sink: Arc<SqlSink>,
    options: ReportOptions,
    span: Span,
}

impl ReportExporter {
    pub fn new(client: HttpClient, sink: Arc<SqlSink>, options: ReportOptions) -> Self {
        Self {
            client,
            sink,
            options,
            span: Span::none(),
        }
    }

    /// Parent log events on `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn options(&self) -> &ReportOptions {
        &self.options
    }

    /// Render every requested format for every live inspection.
    ///
    /// All jobs run to a terminal state before failures are reported, so the
    /// returned error carries the full PDF and WORD failure counts.
    pub async fn export(&self) -> Result<ReportSummary> {
        if self.options.formats.is_empty() {
            return Err(Error::report("No valid export format specified"));
        }
        self.prepare_table()?;
        tokio::fs::create_dir_all(&self.options.output_dir)
            .await
            .with_context(|| format!("cannot create {}", self.options.output_dir.display()))?;

        let targets = self.targets()?;
        let records = self.records()?;
        info!(
            parent: &self.span,
            inspections = targets.len(),
            formats = ?self.options.formats,
            "exporting reports"
        );

        let runner = Arc::new(JobRunner {
            client: self.client.clone(),
            dir: self.options.output_dir.clone(),
            convention: self.options.filename_convention,
            preference_id: self.options.preference_id.clone(),
            poll_unit: self.options.poll_unit,
            timeout: self.options.timeout(),
            write_lock: Mutex::new(()),
            span: self.span.clone(),
        });
        let permits = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut summary = ReportSummary::default();
        let mut tasks = JoinSet::new();

        for target in targets {
            for &format in &self.options.formats {
                let mut job = ReportJob::new(target.clone(), format);
                if let Some(record) = records.get(&(target.audit_id.clone(), format.api_name().to_string())) {
                    if self.options.incremental && self.is_current(&target, record) {
                        debug!(parent: &self.span, inspection = %job.label(), ?format, "report up to date");
                        summary.unchanged += 1;
                        continue;
                    }
                    job.previous_file = Some(record.file_name.clone());
                }

                let permit = Arc::clone(&permits)
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Other(e.to_string()))?;
                let runner = Arc::clone(&runner);
                tasks.spawn(async move {
                    let job = runner.run(job).await;
                    drop(permit);
                    job
                });
            }
        }

        // Bookkeeping errors wait until every job has finished
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let job = match joined {
                Ok(job) => job,
                Err(e) => {
                    error!(parent: &self.span, "report task failed: {e}");
                    first_error.get_or_insert(Error::Other(format!("report task failed: {e}")));
                    continue;
                }
            };
            match &job.state {
                JobState::Succeeded { file_name } => {
                    if let Err(e) = self.record(&job, file_name) {
                        error!(parent: &self.span, inspection = %job.label(), "cannot record report: {e}");
                        first_error.get_or_insert(e);
                    }
                }
                JobState::Failed { reason } => {
                    warn!(parent: &self.span, inspection = %job.label(), format = ?job.format, "{reason}")
                }
                JobState::Expired { elapsed } => warn!(
                    parent: &self.span,
                    inspection = %job.label(),
                    format = ?job.format,
                    "report not ready after {elapsed:?}"
                ),
                _ => {}
            }
            summary.record(job.format, &job.state);
        }

        if self.client.cancellation().is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            parent: &self.span,
            pdf = summary.pdf_saved,
            word = summary.word_saved,
            unchanged = summary.unchanged,
            "report export finished"
        );
        if summary.has_failures() {
            return Err(Error::ReportsFailed {
                pdf: summary.pdf_failed,
                word: summary.word_failed,
            });
        }
        Ok(summary)
    }

    fn is_current(&self, target: &ReportTarget, record: &ExportRecord) -> bool {
        record.modified_at_us == target.modified_at.timestamp_micros()
            && self.options.output_dir.join(&record.file_name).exists()
    }

    // ========================================================================
    // Bookkeeping
    // ========================================================================

    fn prepare_table(&self) -> Result<()> {
        let incremental = self.options.incremental;
        self.sink.store().with_conn(|conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {REPORT_EXPORTS_TABLE} (
                    audit_id VARCHAR NOT NULL,
                    format VARCHAR NOT NULL,
                    modified_at TIMESTAMP NOT NULL,
                    file_name VARCHAR NOT NULL,
                    PRIMARY KEY (audit_id, format)
                )"
            ))?;
            if !incremental {
                conn.execute_batch(&format!("DELETE FROM {REPORT_EXPORTS_TABLE}"))?;
            }
            Ok(())
        })
    }

    /// Live inspections, oldest change first
    pub fn targets(&self) -> Result<Vec<ReportTarget>> {
        let rows: Vec<(String, Option<String>, Option<i64>)> = self
            .sink
            .store()
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT audit_id, name, epoch_us(modified_at) FROM {} \
                     WHERE deleted IS NOT TRUE ORDER BY modified_at, audit_id",
                    quote(INSPECTIONS)
                ))?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<duckdb::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .context("cannot read inspections to report on")?;

        rows.into_iter()
            .map(|(audit_id, name, micros)| {
                let modified_at = DateTime::from_timestamp_micros(micros.unwrap_or_default())
                    .ok_or_else(|| Error::storage(format!("bad modified_at for {audit_id}")))?;
                Ok(ReportTarget {
                    audit_id,
                    name: name.unwrap_or_default(),
                    modified_at,
                })
            })
            .collect()
    }

    fn records(&self) -> Result<HashMap<(String, String), ExportRecord>> {
        self.sink.store().with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT audit_id, format, epoch_us(modified_at), file_name FROM {REPORT_EXPORTS_TABLE}"
            ))?;
            let records = stmt
                .query_map([], |row| {
                    Ok((
                        (row.get(0)?, row.get(1)?),
                        ExportRecord {
                            modified_at_us: row.get(2)?,
                            file_name: row.get(3)?,
                        },
                    ))
                })?
                .collect::<duckdb::Result<HashMap<_, _>>>()?;
            Ok(records)
        })
    }

    fn record(&self, job: &ReportJob, file_name: &str) -> Result<()> {
        let audit_id = job.target.audit_id.as_str();
        let format = job.format.api_name();
        let modified_at = job.target.modified_at.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
        self.sink.store().with_conn(|conn| {
            conn.execute(
                &format!("DELETE FROM {REPORT_EXPORTS_TABLE} WHERE audit_id = ? AND format = ?"),
                params![audit_id, format],
            )?;
            conn.execute(
                &format!(
                    "INSERT INTO {REPORT_EXPORTS_TABLE} (audit_id, format, modified_at, file_name) \
                     VALUES (?, ?, CAST(? AS TIMESTAMP), ?)"
                ),
                params![audit_id, format, modified_at, file_name],
            )?;
            Ok(())
        })
    }
}

/// Drives single jobs through their states
#[derive(Debug)]
struct JobRunner {
    client: HttpClient,
    dir: PathBuf,
    convention: FilenameConvention,
    preference_id: Option<String>,
    poll_unit: Duration,
    timeout: Duration,
    write_lock: Mutex<()>,
    span: Span,
}

impl JobRunner {
    async fn run(&self, mut job: ReportJob) -> ReportJob {
        while !job.state.is_terminal() {
            job.state = self.advance(&job).await;
        }
        job
    }

    async fn advance(&self, job: &ReportJob) -> JobState {
        match &job.state {
            JobState::Pending => match self.initiate(job).await {
                Ok(message_id) => JobState::Initiated { message_id },
                Err(e) => JobState::Failed {
                    reason: format!("cannot start {:?} report: {e}", job.format),
                },
            },
            JobState::Initiated { message_id } => JobState::Polling {
                message_id: message_id.clone(),
                elapsed: Duration::ZERO,
            },
            JobState::Polling { message_id, elapsed } => {
                let wait = poll_wait(*elapsed, self.poll_unit);
                if let Err(e) = self.client.sleep(wait).await {
                    return JobState::Failed { reason: e.to_string() };
                }
                let elapsed = *elapsed + wait;

                let completion = match self.check(job, message_id).await {
                    Ok(c) => c,
                    Err(e) => {
                        return JobState::Failed {
                            reason: format!("cannot check {:?} report: {e}", job.format),
                        }
                    }
                };
                match completion.status.as_str() {
                    STATUS_SUCCESS => match self.download(job, &completion.url).await {
                        Ok(file_name) => JobState::Succeeded { file_name },
                        Err(e) => JobState::Failed {
                            reason: format!("cannot download {:?} report: {e}", job.format),
                        },
                    },
                    STATUS_FAILED => JobState::Failed {
                        reason: format!("{:?} report generation failed", job.format),
                    },
                    _ if elapsed >= self.timeout => JobState::Expired { elapsed },
                    _ => JobState::Polling {
                        message_id: message_id.clone(),
                        elapsed,
                    },
                }
            }
            terminal => terminal.clone(),
        }
    }

    async fn initiate(&self, job: &ReportJob) -> Result<String> {
        let mut body = json!({ "format": job.format.api_name() });
        if let Some(preference) = &self.preference_id {
            body["preference_id"] = json!(preference);
        }
        let response: InitiateResponse = self
            .client
            .post_json(&format!("audits/{}/report", job.target.audit_id), body)
            .await?;
        debug!(parent: &self.span, inspection = %job.label(), message_id = %response.message_id, "report requested");
        Ok(response.message_id)
    }

    async fn check(&self, job: &ReportJob, message_id: &str) -> Result<CompletionResponse> {
        self.client
            .get_json(
                &format!("audits/{}/report/{message_id}", job.target.audit_id),
                RequestConfig::new(),
            )
            .await
    }

    async fn download(&self, job: &ReportJob, url: &str) -> Result<String> {
        if url.is_empty() {
            return Err(Error::report("report finished without a download url"));
        }
        let download = self.client.get_bytes(url).await?;
        if download.body.is_empty() {
            return Err(Error::report("report download was empty"));
        }

        // Name choice and write happen under one lock so concurrent jobs
        // never pick the same free name
        let _guard = self.write_lock.lock().await;
        if let Some(previous) = &job.previous_file {
            remove_if_present(&self.dir.join(previous)).await?;
        }
        let stem = base_name(&job.target, self.convention);
        let file_name = unique_file_name(&self.dir, &stem, job.format);
        tokio::fs::write(self.dir.join(&file_name), &download.body)
            .await
            .with_context(|| format!("cannot write {file_name}"))?;
        info!(parent: &self.span, inspection = %job.label(), file = %file_name, "report saved");
        Ok(file_name)
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
