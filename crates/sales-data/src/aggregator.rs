//! Windowed sales aggregation and the same-day anomaly digest.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use sales_core::categories::UNMAPPED_LABEL;
use sales_core::models::{AnomalyDigest, AnomalyRecord, Record, Report};
use tracing::{debug, info};

use crate::dataset::Dataset;

/// Default trailing window of the report, in days.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;

// ── Rounding ──────────────────────────────────────────────────────────────────

/// Round to `decimals` places, ties to even.
pub fn round_half_even(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round_ties_even() / factor
}

// ── SalesStats ────────────────────────────────────────────────────────────────

/// Running sum and count for one group.
#[derive(Debug, Clone, Copy, Default)]
struct SalesStats {
    sum: f64,
    count: u32,
}

impl SalesStats {
    fn add(&mut self, amount: f64) {
        self.sum += amount;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

// ── Aggregator ────────────────────────────────────────────────────────────────

/// Computes a [`Report`] over the trailing window of a dataset.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator {
    lookback_days: u32,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKBACK_DAYS)
    }
}

impl Aggregator {
    pub fn new(lookback_days: u32) -> Self {
        Self { lookback_days }
    }

    /// First date included in the window ending at `as_of`.
    pub fn window_start(&self, as_of: NaiveDate) -> NaiveDate {
        as_of - Duration::days(i64::from(self.lookback_days))
    }

    /// Rows with a valid date on or after the window start.
    ///
    /// The window has no upper bound, so future-dated rows are kept. Rows
    /// whose date could not be parsed are dropped.
    pub fn window(&self, dataset: &Dataset, as_of: NaiveDate) -> Dataset {
        let start = self.window_start(as_of);
        dataset.filtered(|r| r.date.is_some_and(|d| d >= start))
    }

    /// Build the full report as of `as_of`.
    pub fn aggregate(&self, dataset: &Dataset, as_of: NaiveDate) -> Report {
        let windowed = self.window(dataset, as_of);
        debug!(
            "Aggregating {} of {} rows from {}",
            windowed.len(),
            dataset.len(),
            self.window_start(as_of)
        );

        let mut by_region: BTreeMap<String, SalesStats> = BTreeMap::new();
        let mut by_category: BTreeMap<String, SalesStats> = BTreeMap::new();

        for record in windowed.records() {
            by_region
                .entry(record.region.clone())
                .or_default()
                .add(record.sales_amount);
            let label = record
                .category_label
                .clone()
                .unwrap_or_else(|| UNMAPPED_LABEL.to_string());
            by_category
                .entry(label)
                .or_default()
                .add(record.sales_amount);
        }

        Report {
            region_report_mean: by_region
                .iter()
                .map(|(k, s)| (k.clone(), round_half_even(s.mean(), 2)))
                .collect(),
            category_report_total: by_category
                .iter()
                .map(|(k, s)| (k.clone(), s.sum.trunc() as i64))
                .collect(),
            category_report_mean: by_category
                .iter()
                .map(|(k, s)| (k.clone(), round_half_even(s.mean(), 2)))
                .collect(),
            today_anomalies: Self::digest(&windowed, as_of),
        }
    }

    /// Anomalous rows dated exactly `as_of`.
    pub fn digest(dataset: &Dataset, as_of: NaiveDate) -> AnomalyDigest {
        let records: Vec<AnomalyRecord> = dataset
            .records()
            .iter()
            .filter(|r| r.is_anomaly && r.date == Some(as_of))
            .map(to_anomaly_record)
            .collect();

        if records.is_empty() {
            info!("No anomalies detected today");
        } else {
            info!("Today's anomalies detected: {}", records.len());
        }

        AnomalyDigest {
            total_anomalies: records.len(),
            records,
        }
    }
}

fn to_anomaly_record(r: &Record) -> AnomalyRecord {
    AnomalyRecord {
        date: r.date.map(|d| d.to_string()).unwrap_or_default(),
        region: r.region.clone(),
        category: r.category_label.clone(),
        product: r.product.clone(),
        sales: r.sales_amount,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
