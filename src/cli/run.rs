use crate::config::parse::load_config;
use crate::pipeline::{Collaborators, IngestionPipeline, PipelineError, RunReport};
use crate::router::SystemClock;
use crate::sink;
use crate::source::lines::GzipOrPlain;
use crate::source::store::ObjectStoreSource;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exit code when the run finished but some objects failed and `--strict` is set.
pub const EXIT_DEGRADED: u8 = 2;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("source error: {0}")]
    Source(#[from] crate::source::store::StoreConfigError),

    #[error("sink error: {0}")]
    Sink(#[from] crate::sink::SinkError),

    #[error("timestamp error: {0}")]
    Timestamp(#[from] crate::source::timestamp::TimestampError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

pub async fn run(
    config_path: Option<PathBuf>,
    strict: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logship/config.yml");
            eprintln!("  /etc/logship/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'logship config init' to generate one.");
            return Ok(ExitCode::FAILURE);
        }
    };

    let report = run_pipeline(&config_path).await?;
    Ok(ExitCode::from(exit_status(&report, strict)))
}

async fn run_pipeline(config_path: &Path) -> Result<RunReport, RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    info!(store = ?config.source.store, bucket = %config.source.bucket, "Opening object store");
    let source = Arc::new(ObjectStoreSource::from_config(&config.source)?);

    info!(sink = ?config.sink.sink_type, group = %config.sink.log_group, "Connecting sink");
    let sink = sink::from_config(&config.sink)?;

    let collaborators = Collaborators {
        lister: source.clone(),
        fetcher: source,
        lines: Arc::new(GzipOrPlain),
        sink,
    };
    let pipeline = IngestionPipeline::from_config(&config, collaborators, Arc::new(SystemClock))?;

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received, finishing in-flight uploads");
                cancel.cancel();
            }
        }
    });

    let result = pipeline.run(cancel).await;
    watcher.abort();

    let report = result.map_err(|e| {
        error!(error = %e, "Ingestion run failed");
        e
    })?;

    if report.cancelled {
        warn!(cancelled_objects = report.cancelled_objects, "Run was interrupted");
    }
    if report.is_degraded() {
        warn!(
            failed_objects = report.failed_objects,
            failed_batches = report.failed_batches,
            "Some objects were not fully shipped"
        );
    }

    match serde_json::to_string(&report) {
        Ok(summary) => info!(report = %summary, "Run report"),
        Err(e) => warn!(error = %e, "Could not serialize run report"),
    }

    Ok(report)
}

fn exit_status(report: &RunReport, strict: bool) -> u8 {
    if strict && report.is_degraded() {
        EXIT_DEGRADED
    } else {
        0
    }
}
