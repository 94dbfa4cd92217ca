use clap::Parser;
use std::path::PathBuf;

use crate::error::{MonitorError, Result};
use crate::watermark::{WatermarkStore, DEFAULT_WATERMARK_PATTERN};

/// File name of the persisted JSON report.
pub const REPORT_JSON_FILE: &str = "sales_report.json";
/// File name of the persisted dataset snapshot.
pub const REPORT_CSV_FILE: &str = "sales_report.csv";
/// Subdirectory of the batch directory holding archived reports.
pub const ARCHIVE_DIR_NAME: &str = "report_archive";
/// Default watermark record name inside the batch directory.
pub const DEFAULT_RECORD_FILE: &str = "last_processed.txt";

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Incremental sales ingestion with per-category anomaly detection
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sales-monitor",
    about = "Incremental sales ingestion with per-category anomaly detection",
    version
)]
pub struct Settings {
    /// Directory containing dated sales batch files
    #[arg(long, env = "SALES_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Watermark record path (defaults to <data-dir>/last_processed.txt)
    #[arg(long)]
    pub record_file: Option<PathBuf>,

    /// Per-category anomaly model artifact (JSON)
    #[arg(long, env = "SALES_MODEL_PATH", default_value = "models/anomaly_models.json")]
    pub model_path: PathBuf,

    /// Directory where the report files are written
    #[arg(long, default_value = ".")]
    pub report_dir: PathBuf,

    /// Pattern a watermark file name must fully match; must accept names
    /// ending in `--batch-extension`
    #[arg(long, default_value = DEFAULT_WATERMARK_PATTERN)]
    pub watermark_pattern: String,

    /// Extension of candidate batch files
    #[arg(long, default_value = "csv")]
    pub batch_extension: String,

    /// Trailing window of the report, in days (1-365)
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..=365))]
    pub lookback_days: u32,

    /// Seconds between cycles in watch mode (10-86400)
    #[arg(long, default_value = "300", value_parser = clap::value_parser!(u64).range(10..=86400))]
    pub interval: u64,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Settings {
    /// Parse the process arguments and apply `--debug`.
    pub fn load() -> Self {
        Self::load_from_args(std::env::args_os())
    }

    /// Same as [`Settings::load`] but with an explicit argument list.
    pub fn load_from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut settings = Settings::parse_from(args);
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    /// Watermark record path, resolved against `data_dir` when not given.
    pub fn resolved_record_file(&self) -> PathBuf {
        self.record_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DEFAULT_RECORD_FILE))
    }
}

// ── MonitorConfig ──────────────────────────────────────────────────────────────

/// Everything the runtime needs to build a monitor, detached from the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub data_dir: PathBuf,
    pub record_file: PathBuf,
    pub model_path: PathBuf,
    pub report_json: PathBuf,
    pub report_csv: PathBuf,
    pub archive_dir: PathBuf,
    pub watermark_pattern: String,
    pub batch_extension: String,
    pub lookback_days: u32,
}

impl MonitorConfig {
    /// Default layout rooted at `data_dir`, with reports written to `report_dir`.
    pub fn new(data_dir: impl Into<PathBuf>, report_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let report_dir = report_dir.into();
        Self {
            record_file: data_dir.join(DEFAULT_RECORD_FILE),
            model_path: PathBuf::from("models/anomaly_models.json"),
            report_json: report_dir.join(REPORT_JSON_FILE),
            report_csv: report_dir.join(REPORT_CSV_FILE),
            archive_dir: data_dir.join(ARCHIVE_DIR_NAME),
            watermark_pattern: DEFAULT_WATERMARK_PATTERN.to_string(),
            batch_extension: "csv".to_string(),
            lookback_days: 30,
            data_dir,
        }
    }
}

impl MonitorConfig {
    /// Check that the watermark pattern accepts a batch name with the
    /// configured extension.
    ///
    /// Otherwise every cycle would merge and report, then fail to record
    /// the batch it just processed.
    pub fn validate(&self) -> Result<()> {
        let store = WatermarkStore::new(&self.record_file, &self.watermark_pattern)?;
        let sample = format!("sales_2024-01-01.{}", self.batch_extension);
        if store.is_valid_name(&sample) {
            Ok(())
        } else {
            Err(MonitorError::Config(format!(
                "watermark pattern '{}' rejects batch names like '{}'; \
                 adjust --watermark-pattern or --batch-extension",
                self.watermark_pattern, sample
            )))
        }
    }
}

impl From<&Settings> for MonitorConfig {
    fn from(s: &Settings) -> Self {
        MonitorConfig {
            record_file: s.resolved_record_file(),
            model_path: s.model_path.clone(),
            report_json: s.report_dir.join(REPORT_JSON_FILE),
            report_csv: s.report_dir.join(REPORT_CSV_FILE),
            archive_dir: s.data_dir.join(ARCHIVE_DIR_NAME),
            watermark_pattern: s.watermark_pattern.clone(),
            batch_extension: s.batch_extension.clone(),
            lookback_days: s.lookback_days,
            data_dir: s.data_dir.clone(),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default_values() {
        let settings = Settings::parse_from(["sales-monitor"]);

        assert_eq!(settings.data_dir, PathBuf::from("data"));
        assert!(settings.record_file.is_none());
        assert_eq!(
            settings.model_path,
            PathBuf::from("models/anomaly_models.json")
        );
        assert_eq!(settings.report_dir, PathBuf::from("."));
        assert_eq!(settings.watermark_pattern, DEFAULT_WATERMARK_PATTERN);
        assert_eq!(settings.batch_extension, "csv");
        assert_eq!(settings.lookback_days, 30);
        assert_eq!(settings.interval, 300);
        assert!(!settings.once);
        assert_eq!(settings.log_level, "INFO");
        assert!(settings.log_file.is_none());
        assert!(!settings.debug);
    }

    #[test]
    fn test_settings_debug_overrides_log_level() {
        let settings = Settings::load_from_args(["sales-monitor", "--debug"]);
        assert_eq!(settings.log_level, "DEBUG");
    }

    #[test]
    fn test_settings_lookback_range_enforced() {
        assert!(Settings::try_parse_from(["sales-monitor", "--lookback-days", "0"]).is_err());
        let ok = Settings::try_parse_from(["sales-monitor", "--lookback-days", "7"]).unwrap();
        assert_eq!(ok.lookback_days, 7);
    }

    #[test]
    fn test_record_file_defaults_into_data_dir() {
        let settings = Settings::parse_from(["sales-monitor", "--data-dir", "/srv/sales"]);
        assert_eq!(
            settings.resolved_record_file(),
            PathBuf::from("/srv/sales/last_processed.txt")
        );

        let explicit = Settings::parse_from([
            "sales-monitor",
            "--record-file",
            "/var/lib/sales/watermark.txt",
        ]);
        assert_eq!(
            explicit.resolved_record_file(),
            PathBuf::from("/var/lib/sales/watermark.txt")
        );
    }

    #[test]
    fn test_monitor_config_from_settings() {
        let settings = Settings::parse_from([
            "sales-monitor",
            "--data-dir",
            "/srv/sales",
            "--report-dir",
            "/srv/reports",
            "--lookback-days",
            "14",
        ]);
        let config = MonitorConfig::from(&settings);

        assert_eq!(config.data_dir, PathBuf::from("/srv/sales"));
        assert_eq!(
            config.report_json,
            PathBuf::from("/srv/reports/sales_report.json")
        );
        assert_eq!(
            config.report_csv,
            PathBuf::from("/srv/reports/sales_report.csv")
        );
        assert_eq!(
            config.archive_dir,
            PathBuf::from("/srv/sales/report_archive")
        );
        assert_eq!(config.lookback_days, 14);
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(MonitorConfig::new("/d", "/r").validate().is_ok());

        let settings = Settings::parse_from([
            "sales-monitor",
            "--batch-extension",
            "json",
            "--watermark-pattern",
            r"[\w\-.]+\.json",
        ]);
        assert!(MonitorConfig::from(&settings).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_mismatched_extension() {
        let settings = Settings::parse_from(["sales-monitor", "--batch-extension", "json"]);
        let err = MonitorConfig::from(&settings).validate().unwrap_err();

        assert!(matches!(err, MonitorError::Config(_)));
        assert!(err.to_string().contains("sales_2024-01-01.json"));
    }

    #[test]
    fn test_validate_reports_bad_pattern() {
        let mut config = MonitorConfig::new("/d", "/r");
        config.watermark_pattern = "([".to_string();
        assert!(matches!(
            config.validate(),
            Err(MonitorError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_monitor_config_new_layout() {
        let config = MonitorConfig::new("/d", "/r");
        assert_eq!(config.record_file, PathBuf::from("/d/last_processed.txt"));
        assert_eq!(config.archive_dir, PathBuf::from("/d/report_archive"));
        assert_eq!(config.report_json, PathBuf::from("/r/sales_report.json"));
        assert_eq!(config.lookback_days, 30);
    }
}
