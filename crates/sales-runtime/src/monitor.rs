//! Incremental ingestion state machine.
//!
//! [`IncrementalMonitor`] owns the consolidated [`Dataset`] and drives one
//! cycle at a time: compare the batch directory against the persisted
//! watermark, archive the previous report, merge the new batches, rerun
//! anomaly detection over everything, persist a fresh report and only then
//! advance the watermark.
//!
//! Every cycle works on a staged copy of the dataset. The copy replaces the
//! live dataset only after the watermark has been written, so a cycle that
//! aborts at any stage leaves both the dataset and the watermark at their
//! pre-cycle values and the next trigger retries the same batches.

use std::fmt;

use chrono::{Local, NaiveDate};
use sales_core::models::{BatchFile, Watermark};
use sales_core::settings::MonitorConfig;
use sales_core::watermark::WatermarkStore;
use sales_core::MonitorError;
use sales_data::aggregator::Aggregator;
use sales_data::dataset::Dataset;
use sales_data::detector::{AnomalyDetector, DetectionReport, ModelSource};
use sales_data::reader::{
    batches_since, batches_through, discover_batches, load_batch, load_batches,
};
use sales_data::report::ReportStore;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ── States ────────────────────────────────────────────────────────────────────

/// Where the monitor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Uninitialized,
    Ready,
    DetectingNew,
    Archiving,
    Merging,
    DetectingAnomalies,
    Reporting,
    AdvancingWatermark,
    /// Setup failed; the next trigger retries initialization.
    Degraded,
}

/// The step a cycle was in when it aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Initializing,
    DetectingNew,
    Merging,
    Reporting,
    AdvancingWatermark,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initialization",
            Self::DetectingNew => "batch detection",
            Self::Merging => "merge",
            Self::Reporting => "report persistence",
            Self::AdvancingWatermark => "watermark advance",
        };
        f.write_str(name)
    }
}

/// A cycle that stopped before committing.
#[derive(Debug, Error)]
#[error("cycle aborted during {stage}: {source}")]
pub struct CycleError {
    pub stage: CycleStage,
    #[source]
    pub source: MonitorError,
}

impl CycleError {
    fn at(stage: CycleStage) -> impl FnOnce(MonitorError) -> Self {
        move |source| Self { stage, source }
    }
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

/// What a committed cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    /// Names of the batches merged, oldest first.
    pub batches: Vec<String>,
    pub rows_merged: usize,
    /// Dataset size after the merge.
    pub total_rows: usize,
    pub detection: DetectionReport,
    /// The watermark written at the end of the cycle.
    pub watermark: String,
}

/// Result of a cycle that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No watermark and no batches: nothing to do yet.
    Empty,
    /// The batch directory is unusable; the monitor is idle until retried.
    Degraded { reason: String },
    /// Nothing newer than the watermark.
    NoNewBatches,
    Processed(CycleSummary),
}

// ── IncrementalMonitor ────────────────────────────────────────────────────────

/// Watermark-driven ingestion pipeline over one batch directory.
///
/// Call [`IncrementalMonitor::run_cycle`] once per external trigger. The
/// first call initializes from disk; later calls only look for batches
/// newer than the watermark.
pub struct IncrementalMonitor {
    /// Paths and tuning the monitor was built from.
    config: MonitorConfig,
    /// Persisted record of the last processed batch.
    watermarks: WatermarkStore,
    /// Current report files and their archive directory.
    reports: ReportStore,
    /// Where per-category models are loaded from on every detection pass.
    models: Box<dyn ModelSource + Send>,
    /// Trailing-window aggregation settings.
    aggregator: Aggregator,
    /// Rows from every committed batch, in merge order.
    dataset: Dataset,
    /// Lifecycle position; only changes through a cycle.
    state: MonitorState,
    /// Description of the failure that ended the last cycle.
    last_error: Option<String>,
}

impl fmt::Debug for IncrementalMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalMonitor")
            .field("data_dir", &self.config.data_dir)
            .field("state", &self.state)
            .field("rows", &self.dataset.len())
            .finish()
    }
}

impl IncrementalMonitor {
    /// Build a monitor.
    ///
    /// Fails on an invalid watermark pattern, or one that would reject the
    /// names of the batches it is meant to record.
    pub fn new(
        config: MonitorConfig,
        models: Box<dyn ModelSource + Send>,
    ) -> sales_core::Result<Self> {
        config.validate()?;
        let watermarks = WatermarkStore::new(&config.record_file, &config.watermark_pattern)?;
        let reports = ReportStore::new(
            &config.report_json,
            &config.report_csv,
            &config.archive_dir,
        );
        Ok(Self {
            aggregator: Aggregator::new(config.lookback_days),
            config,
            watermarks,
            reports,
            models,
            dataset: Dataset::new(),
            state: MonitorState::Uninitialized,
            last_error: None,
        })
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Description of the failure that ended the last cycle, if it failed.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// First run: rebuild state from disk, then process anything new.
    ///
    /// With no watermark every discovered batch is the initial full load.
    /// With a watermark, the batches it already covers are reloaded into
    /// the dataset without reporting (unreadable ones are skipped), and
    /// newer ones are processed as a normal cycle. A missing batch
    /// directory moves the monitor to [`MonitorState::Degraded`].
    pub fn initialize(&mut self, today: NaiveDate) -> Result<CycleOutcome, CycleError> {
        info!("Initializing monitor for {}", self.config.data_dir.display());
        self.state = MonitorState::DetectingNew;

        let watermark = match self.watermarks.read() {
            Ok(w) => w,
            Err(source) => {
                return Err(self.degrade(CycleError {
                    stage: CycleStage::Initializing,
                    source,
                }))
            }
        };

        let batches = match discover_batches(&self.config.data_dir, &self.config.batch_extension)
        {
            Ok(b) => b,
            Err(e) => {
                let reason = e.to_string();
                warn!("Cannot list batch directory: {}", reason);
                self.state = MonitorState::Degraded;
                self.last_error = Some(reason.clone());
                return Ok(CycleOutcome::Degraded { reason });
            }
        };

        let pending = match watermark {
            None if batches.is_empty() => {
                info!("No batches found and no watermark recorded; waiting for data");
                self.state = MonitorState::Ready;
                self.last_error = None;
                return Ok(CycleOutcome::Empty);
            }
            None => {
                info!("No watermark recorded; loading all {} batches", batches.len());
                batches
            }
            Some(wm) => self.rehydrate(&wm, batches),
        };

        self.state = MonitorState::Ready;
        self.last_error = None;
        if pending.is_empty() {
            info!("No new batches since last run");
            return Ok(CycleOutcome::NoNewBatches);
        }
        self.process(pending, today)
    }

    /// Run one cycle, initializing first if needed.
    pub fn run_cycle(&mut self, today: NaiveDate) -> Result<CycleOutcome, CycleError> {
        if matches!(
            self.state,
            MonitorState::Uninitialized | MonitorState::Degraded
        ) {
            return self.initialize(today);
        }

        debug!("Starting cycle for {}", today);
        self.state = MonitorState::DetectingNew;

        let watermark = self
            .watermarks
            .read()
            .map_err(CycleError::at(CycleStage::DetectingNew))
            .map_err(|e| self.abort(e))?;

        let batches = match discover_batches(&self.config.data_dir, &self.config.batch_extension)
        {
            Ok(b) => b,
            Err(e) => {
                warn!("Cannot list batch directory, treating as no new batches: {}", e);
                self.state = MonitorState::Ready;
                self.last_error = Some(e.to_string());
                return Ok(CycleOutcome::NoNewBatches);
            }
        };

        let pending = match watermark {
            Some(Watermark { date: Some(date), .. }) => batches_since(batches, Some(date)),
            Some(Watermark { batch_id, date: None }) => {
                warn!(
                    "Watermark '{}' carries no date; treating every batch as new",
                    batch_id
                );
                batches
            }
            None => batches,
        };

        if pending.is_empty() {
            info!("No new batches found");
            self.state = MonitorState::Ready;
            self.last_error = None;
            return Ok(CycleOutcome::NoNewBatches);
        }
        self.process(pending, today)
    }

    // ── Private implementation ────────────────────────────────────────────

    /// Reload already-processed batches and return the ones still pending.
    fn rehydrate(
        &mut self,
        watermark: &Watermark,
        batches: Vec<BatchFile>,
    ) -> Vec<BatchFile> {
        let Some(date) = watermark.date else {
            warn!(
                "Watermark '{}' carries no date; treating every batch as new",
                watermark.batch_id
            );
            return batches;
        };

        let processed = batches_through(batches.clone(), date, &watermark.batch_id);
        let pending = batches_since(batches, Some(date));

        // a history batch that no longer loads is dropped, not fatal
        let mut records = Vec::new();
        let mut restored = 0usize;
        for batch in &processed {
            match load_batch(batch) {
                Ok(rows) => {
                    records.extend(rows);
                    restored += 1;
                }
                Err(e) => {
                    warn!(batch = %batch.name, error = %e, "Skipping unreadable processed batch")
                }
            }
        }
        info!(
            "Restored {} rows from {} of {} batches up to {}",
            records.len(),
            restored,
            processed.len(),
            watermark.batch_id
        );
        self.dataset = Dataset::from_records(records);
        pending
    }

    /// Archive, merge, detect, report, then advance the watermark.
    fn process(
        &mut self,
        pending: Vec<BatchFile>,
        today: NaiveDate,
    ) -> Result<CycleOutcome, CycleError> {
        let names: Vec<String> = pending.iter().map(|b| b.name.clone()).collect();
        info!("Processing {} new batches: {}", names.len(), names.join(", "));

        self.state = MonitorState::Archiving;
        self.reports.archive(Local::now().naive_local());

        self.state = MonitorState::Merging;
        let records = load_batches(&pending)
            .map_err(CycleError::at(CycleStage::Merging))
            .map_err(|e| self.abort(e))?;
        let rows_merged = records.len();
        let mut staged = self.dataset.merged(records);

        self.state = MonitorState::DetectingAnomalies;
        let detection = AnomalyDetector::detect(&mut staged, self.models.as_ref());
        for diagnostic in &detection.diagnostics {
            debug!("Detection diagnostic: {}", diagnostic);
        }

        self.state = MonitorState::Reporting;
        let report = self.aggregator.aggregate(&staged, today);
        self.reports
            .persist(&report, &staged)
            .map_err(CycleError::at(CycleStage::Reporting))
            .map_err(|e| self.abort(e))?;

        self.state = MonitorState::AdvancingWatermark;
        // pending is sorted by date, so the last batch is the newest
        let latest = names.last().cloned().unwrap_or_default();
        self.watermarks
            .write(&latest)
            .map_err(CycleError::at(CycleStage::AdvancingWatermark))
            .map_err(|e| self.abort(e))?;

        self.dataset = staged;
        self.state = MonitorState::Ready;
        self.last_error = None;
        info!(
            "Cycle complete: merged {} rows, dataset now {} rows, watermark {}",
            rows_merged,
            self.dataset.len(),
            latest
        );

        Ok(CycleOutcome::Processed(CycleSummary {
            batches: names,
            rows_merged,
            total_rows: self.dataset.len(),
            detection,
            watermark: latest,
        }))
    }

    /// Record a failed cycle and return to a retriable state.
    fn abort(&mut self, err: CycleError) -> CycleError {
        error!("{}", err);
        self.state = MonitorState::Ready;
        self.last_error = Some(err.to_string());
        err
    }

    /// Record a failed initialization; the next trigger starts over.
    fn degrade(&mut self, err: CycleError) -> CycleError {
        error!("{}", err);
        self.state = MonitorState::Degraded;
        self.last_error = Some(err.to_string());
        err
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sales_data::detector::{ModelLoadError, ModelRegistry};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct NoModels;

    impl ModelSource for NoModels {
        fn load(&self) -> Result<ModelRegistry, ModelLoadError> {
            Err(ModelLoadError::Empty)
        }
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn write_batch(dir: &Path, name: &str, rows: &[(&str, &str, &str, f64)]) {
        let mut body = String::from("Date,Region,Product Category,Product,Sales\n");
        for (date, region, code, sales) in rows {
            body.push_str(&format!("{date},{region},{code},Item,{sales}\n"));
        }
        fs::write(dir.join(name), body).unwrap();
    }

    fn monitor(tmp: &TempDir) -> IncrementalMonitor {
        let config = MonitorConfig::new(tmp.path().join("data"), tmp.path().join("out"));
        IncrementalMonitor::new(config, Box::new(NoModels)).unwrap()
    }

    #[test]
    fn test_new_starts_uninitialized() {
        let tmp = TempDir::new().unwrap();
        let m = monitor(&tmp);
        assert_eq!(m.state(), MonitorState::Uninitialized);
        assert!(m.dataset().is_empty());
        assert!(m.last_error().is_none());
    }

    #[test]
    fn test_new_rejects_bad_pattern() {
        let tmp = TempDir::new().unwrap();
        let mut config = MonitorConfig::new(tmp.path(), tmp.path());
        config.watermark_pattern = "([".to_string();
        assert!(IncrementalMonitor::new(config, Box::new(NoModels)).is_err());
    }

    #[test]
    fn test_new_rejects_pattern_that_refuses_batch_names() {
        let tmp = TempDir::new().unwrap();
        let mut config = MonitorConfig::new(tmp.path(), tmp.path());
        config.batch_extension = "json".to_string();

        let err = IncrementalMonitor::new(config, Box::new(NoModels)).unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[test]
    fn test_degraded_then_recovers() {
        let tmp = TempDir::new().unwrap();
        let mut m = monitor(&tmp);

        let outcome = m.run_cycle(ymd(2024, 1, 5)).unwrap();
        assert!(matches!(outcome, CycleOutcome::Degraded { .. }));
        assert_eq!(m.state(), MonitorState::Degraded);
        assert!(m.last_error().is_some());

        let data = tmp.path().join("data");
        fs::create_dir_all(&data).unwrap();
        write_batch(&data, "sales_2024-01-05.csv", &[("2024-01-05", "North", "AA", 10.0)]);

        let outcome = m.run_cycle(ymd(2024, 1, 5)).unwrap();
        assert!(matches!(outcome, CycleOutcome::Processed(_)));
        assert_eq!(m.state(), MonitorState::Ready);
        assert!(m.last_error().is_none());
    }

    #[test]
    fn test_second_cycle_without_new_batches_is_noop() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        fs::create_dir_all(&data).unwrap();
        write_batch(&data, "sales_2024-01-05.csv", &[("2024-01-05", "North", "AA", 10.0)]);

        let mut m = monitor(&tmp);
        m.run_cycle(ymd(2024, 1, 5)).unwrap();
        let outcome = m.run_cycle(ymd(2024, 1, 5)).unwrap();

        assert_eq!(outcome, CycleOutcome::NoNewBatches);
        assert_eq!(m.dataset().len(), 1);
    }

    #[test]
    fn test_same_date_batch_after_watermark_is_not_reprocessed() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        fs::create_dir_all(&data).unwrap();
        write_batch(&data, "a_2024-01-05.csv", &[("2024-01-05", "North", "AA", 10.0)]);

        let mut m = monitor(&tmp);
        m.run_cycle(ymd(2024, 1, 5)).unwrap();

        write_batch(&data, "b_2024-01-05.csv", &[("2024-01-05", "South", "AA", 20.0)]);
        assert_eq!(m.run_cycle(ymd(2024, 1, 5)).unwrap(), CycleOutcome::NoNewBatches);
        assert_eq!(m.dataset().len(), 1);
    }

    #[test]
    fn test_bad_batch_aborts_at_merge() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("sales_2024-01-05.csv"), "Date,Region\n2024-01-05,North\n").unwrap();

        let mut m = monitor(&tmp);
        let err = m.run_cycle(ymd(2024, 1, 5)).unwrap_err();

        assert_eq!(err.stage, CycleStage::Merging);
        assert!(matches!(err.source, MonitorError::MissingColumn { .. }));
        assert_eq!(m.state(), MonitorState::Ready);
        assert!(m.dataset().is_empty());
        assert!(m.last_error().unwrap().contains("merge"));
    }

    #[test]
    fn test_cycle_stage_display() {
        assert_eq!(CycleStage::Reporting.to_string(), "report persistence");
        let err = CycleError {
            stage: CycleStage::AdvancingWatermark,
            source: MonitorError::Config("boom".into()),
        };
        assert!(err.to_string().starts_with("cycle aborted during watermark advance"));
    }
}
