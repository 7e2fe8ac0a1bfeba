use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rgcollector::azure::auth::AzureCredentials;
use rgcollector::azure::blob::AzureBlobStore;
use rgcollector::azure::client::AzureClient;
use rgcollector::azure::http::{format_azure_error, AzureHttpClient};
use rgcollector::azure::table::TableStore;
use rgcollector::config::Settings;
use rgcollector::enrich::Enricher;
use rgcollector::pipeline::{Collector, RunReport};
use rgcollector::sinks::{BlobExporter, LogSink, LokiPublisher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Collect Azure Resource Graph inventory and publish it
#[derive(Parser, Debug)]
#[command(name = "rgcollector", version, about, long_about = None)]
struct Args {
    /// Flat JSON or YAML file of settings; environment variables take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG when set)
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Run repeatedly, waiting this many seconds between invocations
    #[arg(long)]
    interval: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let Some(path) = log_file else {
        builder.with_writer(std::io::stderr).init();
        return Ok(None);
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    builder.with_writer(non_blocking).with_ansi(false).init();

    tracing::info!("Log file: {:?}", path);
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = setup_logging(args.log_level, args.log_file.as_ref())?;

    let settings = Settings::load(args.config.as_deref())?;
    tracing::info!(
        "Loaded {} graph queries, loki: {}, blob: {}, enrichment: {}",
        settings.queries.len(),
        settings.loki.is_some(),
        settings.blob.is_some(),
        settings.enrichment.is_some()
    );

    let Some(secs) = args.interval else {
        return invoke(&settings).await.map(|_| ());
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = invoke(&settings).await {
            tracing::error!("invocation failed: {:#}", e);
        }
    }
}

/// One full pass; clients are built fresh so nothing is shared across runs
async fn invoke(settings: &Settings) -> Result<RunReport> {
    tracing::info!("Started collection run");

    let http = AzureHttpClient::new()?;
    let credentials = AzureCredentials::new(settings.credentials.clone(), http.clone());
    let client = AzureClient::new(credentials, http.clone(), &settings.arm_url);

    let table = settings
        .enrichment
        .as_ref()
        .map(|e| TableStore::new(http.clone(), &e.connection_string, &e.table))
        .transpose()?;
    let loki = settings.loki.as_ref().map(|l| {
        LokiPublisher::new(http.clone(), &l.endpoint, l.auth.clone())
    });
    let exporter = settings
        .blob
        .as_ref()
        .map(|b| AzureBlobStore::new(http.clone(), &b.connection_string, &b.container))
        .transpose()?
        .map(|store| BlobExporter::new(Arc::new(store)));

    let mut collector = Collector::new(&client, &client, settings.labels.clone());
    if let (Some(table), Some(enrichment)) = (&table, &settings.enrichment) {
        collector = collector.with_enricher(Enricher::new(table, enrichment.spec.clone()));
    }
    if let Some(loki) = &loki {
        collector = collector.with_log_sink(loki as &dyn LogSink);
    }
    if let Some(exporter) = exporter {
        collector = collector.with_exporter(exporter);
    }

    let report = match collector.run(&settings.queries).await {
        Ok(report) => report,
        Err(e) => {
            if let rgcollector::CollectorError::QueryExecution(source) = &e {
                tracing::error!("{}", format_azure_error(source));
            }
            return Err(e.into());
        }
    };

    for query in &report.queries {
        tracing::info!(
            "[{}] records: {}, published: {}, failed: {}, artifact: {}",
            query.query,
            query.records,
            query.published,
            query.publish_failures,
            query.artifact.as_deref().unwrap_or("-")
        );
    }

    if !report.is_success() {
        let errors: Vec<&str> = report
            .queries
            .iter()
            .flat_map(|q| q.sink_errors.iter().map(String::as_str))
            .collect();
        anyhow::bail!("collection finished with sink failures: {}", errors.join("; "));
    }

    tracing::info!("Collection run complete, {} records", report.total_records());
    Ok(report)
}
