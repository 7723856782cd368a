//! # Minutes Harvest
//!
//! Harvests municipal meeting minutes (referater) from council websites and
//! archives each document exactly once under a canonical name, either on the
//! local disk or in S3-compatible storage.
//!
//! ## Usage
//!
//! ```sh
//! minutes_harvest --sources sources.yaml --output-dir ./archive
//! ```
//!
//! ## Architecture
//!
//! The application runs as a coordinator plus one child process per source:
//! 1. **Coordinator**: selects sources from the catalog and launches a child
//!    for each (several at a time), then aggregates their reports
//! 2. **Discovery**: the child walks the source's listing through its
//!    pagination strategy and collects meeting references
//! 3. **Archive**: each reference is filtered, checked against storage,
//!    fetched into a private staging directory and stored
//! 4. **Report**: the child writes a JSON report the coordinator reads back
//!
//! A child that crashes only loses its own source.

use clap::Parser;
use std::error::Error;
use std::path::Path;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod browser;
mod cli;
mod config;
mod coordinator;
mod dates;
mod discovery;
mod error;
mod existence;
mod fetch;
mod models;
mod orchestrator;
mod outputs;
mod pagination;
mod policy;
mod sources;
mod staging;
mod storage;
#[cfg(test)]
mod testing;
mod utils;

use cli::Cli;
use config::{RunConfig, SourceCatalog};
use coordinator::Coordinator;
use models::{RunStatus, SourceReport};
use outputs::report::write_report;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();

    let args = Cli::parse();
    debug!(?args.sources, ?args.output_dir, source = ?args.source, "Parsed CLI arguments");

    let config = RunConfig::from_cli(&args)?;
    let catalog = SourceCatalog::load(&config.sources_path)?;

    match args.source.as_deref() {
        Some(id) => run_child(&config, &catalog, id, args.report.as_deref()).await,
        None => {
            info!("minutes_harvest starting up");
            let result = run_coordinator(&config, &catalog).await;
            let elapsed = start_time.elapsed();
            info!(
                ?elapsed,
                secs = elapsed.as_secs(),
                millis = elapsed.subsec_millis(),
                "Execution complete"
            );
            result
        }
    }
}

/// Child mode: run one source and hand the report back.
async fn run_child(
    config: &RunConfig,
    catalog: &SourceCatalog,
    id: &str,
    report_path: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let report = match catalog.find(id) {
        Ok(source) => orchestrator::run_source(config, source).await,
        Err(e) => {
            error!(source = id, error = %e, "Source not in catalog");
            SourceReport::failed_to_start(id, e.to_string(), 0)
        }
    };

    if let Some(path) = report_path {
        if let Err(e) = write_report(&report, path).await {
            error!(path = %path.display(), error = %e, "Failed to write run report");
            return Err(e.into());
        }
    }

    match report.status {
        RunStatus::Passed => Ok(()),
        RunStatus::Failed => Err(format!(
            "source {id} failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        )
        .into()),
    }
}

/// Coordinator mode: one child process per selected source.
async fn run_coordinator(config: &RunConfig, catalog: &SourceCatalog) -> Result<(), Box<dyn Error>> {
    let ids: Vec<String> = catalog.selected(config).map(|s| s.id()).collect();
    if ids.is_empty() {
        warn!(
            filter = ?config.municipality_filter,
            committee = ?config.committee_filter,
            "No sources selected; nothing to do"
        );
        return Ok(());
    }
    info!(count = ids.len(), sources = ?ids, "Sources selected");

    let exe = std::env::current_exe()?;
    let passthrough: Vec<String> = std::env::args().skip(1).collect();
    let coordinator = Coordinator::new(
        exe,
        passthrough,
        config.staging_root.join(".reports"),
        config.max_parallel,
    );

    let summary = coordinator.run_all(ids).await;
    summary.log();

    if summary.any_failed() {
        let failed = summary.runs.iter().filter(|r| r.failed()).count();
        return Err(format!("{failed} of {} sources failed", summary.runs.len()).into());
    }
    Ok(())
}
