mod bootstrap;

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use sales_core::settings::{MonitorConfig, Settings};
use sales_data::detector::JsonModelFile;
use sales_runtime::monitor::{CycleOutcome, IncrementalMonitor};
use sales_runtime::scheduler::{CycleReport, MonitorScheduler};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load();

    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;
    let config = MonitorConfig::from(&settings);
    bootstrap::ensure_directories(&config)?;

    tracing::info!("Sales monitor v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Batches: {}, watermark: {}, models: {}, lookback: {} days",
        config.data_dir.display(),
        config.record_file.display(),
        config.model_path.display(),
        config.lookback_days
    );

    let models = JsonModelFile::new(&config.model_path);
    let mut monitor = IncrementalMonitor::new(config, Box::new(models))
        .context("cannot build monitor")?;

    if settings.once {
        let outcome = monitor.run_cycle(Local::now().date_naive())?;
        log_outcome(&outcome);
        return Ok(());
    }

    tracing::info!("Watching for new batches every {}s", settings.interval);
    let (mut rx, handle) =
        MonitorScheduler::new(Duration::from_secs(settings.interval)).start(monitor);

    loop {
        tokio::select! {
            report = rx.recv() => match report {
                Some(report) => log_report(&report),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received; stopping scheduler");
                handle.abort();
                break;
            }
        }
    }

    Ok(())
}

fn log_report(report: &CycleReport) {
    match &report.outcome {
        Ok(outcome) => log_outcome(outcome),
        Err(e) => tracing::error!(
            cycle = report.cycle,
            "Cycle failed, will retry on next trigger: {}",
            e
        ),
    }
}

fn log_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Empty => tracing::info!("No data yet"),
        CycleOutcome::Degraded { reason } => {
            tracing::warn!("Monitor degraded, will retry on next trigger: {}", reason)
        }
        CycleOutcome::NoNewBatches => tracing::info!("Up to date"),
        CycleOutcome::Processed(summary) => {
            tracing::info!(
                "Processed {} batches ({} rows), {} anomalies flagged, watermark {}",
                summary.batches.len(),
                summary.rows_merged,
                summary.detection.flagged,
                summary.watermark
            );
            for diagnostic in &summary.detection.diagnostics {
                tracing::warn!("Detection: {}", diagnostic);
            }
        }
    }
}
