//! Report persistence and archiving.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use sales_core::models::Report;
use sales_core::settings::{ARCHIVE_DIR_NAME, REPORT_CSV_FILE, REPORT_JSON_FILE};
use sales_core::time_utils::archive_timestamp;
use sales_core::{MonitorError, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dataset::Dataset;

/// One row of the dataset snapshot, in batch column order.
#[derive(Debug, Serialize)]
struct SnapshotRow<'a> {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Region")]
    region: &'a str,
    #[serde(rename = "Product Category")]
    category: &'a str,
    #[serde(rename = "Product Category Mapped")]
    category_mapped: &'a str,
    #[serde(rename = "Product")]
    product: &'a str,
    #[serde(rename = "Sales")]
    sales: f64,
    is_anomaly: bool,
}

/// Where the current report lives and where superseded ones are archived.
#[derive(Debug, Clone)]
pub struct ReportStore {
    json_path: PathBuf,
    csv_path: PathBuf,
    archive_dir: PathBuf,
}

impl ReportStore {
    pub fn new(
        json_path: impl Into<PathBuf>,
        csv_path: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            json_path: json_path.into(),
            csv_path: csv_path.into(),
            archive_dir: archive_dir.into(),
        }
    }

    /// Default file names under `report_dir`, archiving into `data_dir`.
    pub fn in_dirs(report_dir: &Path, data_dir: &Path) -> Self {
        Self::new(
            report_dir.join(REPORT_JSON_FILE),
            report_dir.join(REPORT_CSV_FILE),
            data_dir.join(ARCHIVE_DIR_NAME),
        )
    }

    pub fn json_path(&self) -> &Path {
        &self.json_path
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Write the JSON report and the dataset snapshot.
    ///
    /// Both files are fully rewritten. An error from either write is
    /// returned unchanged so the caller can keep its watermark in place.
    pub fn persist(&self, report: &Report, dataset: &Dataset) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        ensure_parent(&self.json_path)?;
        fs::write(&self.json_path, json).map_err(|e| write_error(&self.json_path, e))?;

        self.write_snapshot(dataset)?;
        info!("Report written to {}", self.json_path.display());
        Ok(())
    }

    fn write_snapshot(&self, dataset: &Dataset) -> Result<()> {
        ensure_parent(&self.csv_path)?;
        let mut writer = csv::Writer::from_path(&self.csv_path)
            .map_err(|e| csv_write_error(&self.csv_path, e))?;

        for r in dataset.records() {
            let row = SnapshotRow {
                date: r.date.map(|d| d.to_string()).unwrap_or_default(),
                region: &r.region,
                category: &r.category_code,
                category_mapped: r.category_label.as_deref().unwrap_or_default(),
                product: &r.product,
                sales: r.sales_amount,
                is_anomaly: r.is_anomaly,
            };
            writer
                .serialize(row)
                .map_err(|e| csv_write_error(&self.csv_path, e))?;
        }
        writer
            .flush()
            .map_err(|e| write_error(&self.csv_path, e))?;
        debug!(
            "Dataset snapshot of {} rows written to {}",
            dataset.len(),
            self.csv_path.display()
        );
        Ok(())
    }

    /// Copy the current report files into the archive directory.
    ///
    /// Files that do not exist yet are skipped. Failures are logged and
    /// never abort the caller. Returns the archive paths actually written.
    pub fn archive(&self, at: NaiveDateTime) -> Vec<PathBuf> {
        let stamp = archive_timestamp(at);
        let mut archived = Vec::new();

        let sources = [(&self.json_path, "json"), (&self.csv_path, "csv")];
        if sources.iter().all(|(p, _)| !p.exists()) {
            debug!("No previous report to archive");
            return archived;
        }

        if let Err(e) = fs::create_dir_all(&self.archive_dir) {
            warn!(
                "Error archiving reports: cannot create {}: {}",
                self.archive_dir.display(),
                e
            );
            return archived;
        }

        for (source, ext) in sources {
            if !source.exists() {
                continue;
            }
            let target = self.archive_dir.join(format!("sales_report_{stamp}.{ext}"));
            match fs::copy(source, &target) {
                Ok(_) => {
                    info!("Archived {} to {}", source.display(), target.display());
                    archived.push(target);
                }
                Err(e) => warn!("Error archiving {}: {}", source.display(), e),
            }
        }
        archived
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| write_error(path, e))
        }
        _ => Ok(()),
    }
}

fn write_error(path: &Path, source: std::io::Error) -> MonitorError {
    MonitorError::FileWrite {
        path: path.to_path_buf(),
        source,
    }
}

fn csv_write_error(path: &Path, err: csv::Error) -> MonitorError {
    let source = match err.into_kind() {
        csv::ErrorKind::Io(io) => io,
        other => std::io::Error::new(std::io::ErrorKind::Other, format!("{other:?}")),
    };
    write_error(path, source)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
