//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands};
use crate::config::ExporterConfig;
use crate::engine::{SyncEngine, SyncOptions, SyncReport};
use crate::error::{Error, Result, ResultExt};
use crate::feed::{catalog, dependency_order, select, FeedDescriptor, INSPECTIONS};
use crate::http::{HttpClient, HttpClientConfig, RateLimiterConfig};
use crate::inspections::{InspectionClient, InspectionExportOptions};
use crate::logging;
use crate::report::{ReportExporter, ReportOptions};
use crate::sink::{CsvSink, JsonSink, SqlSink, StorageSink};
use std::sync::Arc;
use tracing::{info, warn};

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        let config = self.resolve_config()?;
        match &self.cli.command {
            Commands::Configure => self.configure(&config),
            Commands::Schema => {
                print!("{}", render_schema(&planned(&config)?));
                Ok(())
            }
            Commands::Csv => self.export_csv(&config).await,
            Commands::Sql => self.export_sql(&config).await,
            Commands::InspectionJson => self.export_inspection_json(&config).await,
            Commands::Report { .. } => self.export_reports(&config).await,
        }
    }

    /// Configuration file with command-line overrides applied.
    ///
    /// A missing file is not an error: defaults plus overrides are enough
    /// for `configure` to write a first file.
    pub fn resolve_config(&self) -> Result<ExporterConfig> {
        let mut config = if self.cli.config.exists() {
            ExporterConfig::load(&self.cli.config)?
        } else {
            ExporterConfig::default()
        };
        self.cli.apply_overrides(&mut config);
        config.apply_safety_guards();
        Ok(config)
    }

    fn configure(&self, config: &ExporterConfig) -> Result<()> {
        config.save(&self.cli.config)?;
        println!("Configuration written to {}", self.cli.config.display());
        Ok(())
    }

    async fn export_csv(&self, config: &ExporterConfig) -> Result<()> {
        config.validate()?;
        let sink = CsvSink::open(
            &config.export.path,
            &config.export.media_path,
            config.csv.max_rows_per_file,
        )?
        .with_span(logging::component_span("csv"));
        self.sync(config, Arc::new(sink)).await
    }

    async fn export_sql(&self, config: &ExporterConfig) -> Result<()> {
        config.validate()?;
        let sink = SqlSink::connect(&config.db, &config.export.media_path)?
            .with_span(logging::component_span("sql"));
        self.sync(config, Arc::new(sink)).await
    }

    async fn sync(&self, config: &ExporterConfig, sink: Arc<dyn StorageSink>) -> Result<()> {
        let client = build_client(config)?;
        watch_interrupt(&client);
        let engine = SyncEngine::new(client, sink, config);

        if self.cli.create_schema_only {
            let feeds = engine.export_schema().await?;
            println!("Created schema for {feeds} feeds");
            return Ok(());
        }

        let report = engine.export_feeds().await?;
        print_report(&report);
        Ok(())
    }

    async fn export_inspection_json(&self, config: &ExporterConfig) -> Result<()> {
        config.validate()?;
        let client = build_client(config)?;
        watch_interrupt(&client);
        let sink = JsonSink::new(&config.export.path, &config.export.media_path)
            .with_span(logging::component_span("json"));

        let report = InspectionClient::new(
            client,
            Arc::new(sink),
            InspectionExportOptions::from_config(config),
        )
        .with_span(logging::component_span("inspections"))
        .export()
        .await?;
        println!(
            "Exported {} inspections ({} skipped) from {} pages",
            report.exported, report.skipped, report.pages
        );
        Ok(())
    }

    /// Refresh the inspections table, then render its reports
    async fn export_reports(&self, config: &ExporterConfig) -> Result<()> {
        config.validate()?;
        let client = build_client(config)?;
        watch_interrupt(&client);
        let sink = Arc::new(
            SqlSink::connect(&config.db, &config.export.media_path)?
                .with_span(logging::component_span("sql")),
        );

        let feeds: Arc<dyn StorageSink> = sink.clone();
        SyncEngine::new(client.clone(), feeds, config)
            .with_options(SyncOptions::from_config(config).with_tables(vec![INSPECTIONS.to_string()]))
            .export_feeds()
            .await
            .context("cannot refresh inspections")?;

        let summary = ReportExporter::new(client, sink, ReportOptions::from_config(config))
            .with_span(logging::component_span("report"))
            .export()
            .await?;
        println!(
            "Saved {} PDF and {} WORD reports ({} up to date)",
            summary.pdf_saved, summary.word_saved, summary.unchanged
        );
        Ok(())
    }
}

/// HTTP client for the configured API
pub fn build_client(config: &ExporterConfig) -> Result<HttpClient> {
    let api = &config.api;
    let mut builder = HttpClientConfig::builder()
        .base_url(&api.url)
        .bearer(&config.access_token)
        .tls_skip_verify(api.tls_skip_verify);

    if let Some(proxy) = api.proxy_url.as_deref().filter(|p| !p.is_empty()) {
        builder = builder.proxy(proxy);
    }
    if let Some(path) = &api.tls_cert {
        let pem = std::fs::read(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {e}", path.display())))?;
        builder = builder.tls_cert_pem(pem);
    }
    if let Some(rps) = api.requests_per_second {
        builder = builder.rate_limit(RateLimiterConfig::per_second(rps));
    }

    let client = HttpClient::with_config(builder.build())?;
    Ok(client.with_span(logging::component_span("http")))
}

/// Cancel in-flight work on Ctrl-C
fn watch_interrupt(client: &HttpClient) {
    let cancel = client.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping");
            cancel.cancel();
        }
    });
}

fn planned(config: &ExporterConfig) -> Result<Vec<FeedDescriptor>> {
    let selected = select(catalog(config), &config.export.tables);
    if selected.is_empty() {
        return Err(Error::config("no tables selected"));
    }
    dependency_order(selected)
}

/// One `# feed` line and one header row per feed
pub fn render_schema(feeds: &[FeedDescriptor]) -> String {
    let mut out = String::new();
    for feed in feeds {
        out.push_str(&format!("# {}\n{}\n", feed.name, feed.column_names().join(",")));
    }
    out
}

fn print_report(report: &SyncReport) {
    for result in &report.completed {
        info!(
            feed = result.feed,
            rows = result.rows_written,
            pages = result.pages,
            deleted = result.rows_deleted,
            media = result.media_downloaded,
            "feed exported"
        );
    }
    if !report.skipped.is_empty() {
        println!("Skipped (access denied): {}", report.skipped.join(", "));
    }
    println!(
        "Exported {} rows from {} feeds in {}ms",
        report.rows_written,
        report.completed.len(),
        report.duration_ms
    );
}
