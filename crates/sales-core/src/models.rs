use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::categories::map_category;
use crate::time_utils::extract_date_from_filename;

// ── Record ────────────────────────────────────────────────────────────────────

/// One sales transaction read from a batch file.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Calendar date of the sale; `None` when the raw cell was unparseable.
    pub date: Option<NaiveDate>,
    /// Sales region.
    pub region: String,
    /// Raw category code as it appears in the batch (e.g. `"AA"`).
    pub category_code: String,
    /// Label derived from `category_code`; `None` for unknown codes.
    pub category_label: Option<String>,
    /// Product name.
    pub product: String,
    /// Sales amount.
    pub sales_amount: f64,
    /// Set only by anomaly detection.
    pub is_anomaly: bool,
}

impl Record {
    /// Build a record, deriving `category_label` from `category_code`.
    pub fn new(
        date: Option<NaiveDate>,
        region: impl Into<String>,
        category_code: impl Into<String>,
        product: impl Into<String>,
        sales_amount: f64,
    ) -> Self {
        let category_code = category_code.into();
        let category_label = map_category(&category_code).map(str::to_string);
        Self {
            date,
            region: region.into(),
            category_code,
            category_label,
            product: product.into(),
            sales_amount,
            is_anomaly: false,
        }
    }
}

// ── BatchFile ─────────────────────────────────────────────────────────────────

/// A candidate batch discovered in the source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    /// File name only; doubles as the batch identifier.
    pub name: String,
    /// Full path to the file.
    pub path: PathBuf,
    /// Date embedded in the file name.
    pub date: NaiveDate,
}

// ── Watermark ─────────────────────────────────────────────────────────────────

/// The most recently processed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    /// Batch file name as persisted.
    pub batch_id: String,
    /// Date derived from `batch_id`, if it embeds one.
    pub date: Option<NaiveDate>,
}

impl Watermark {
    pub fn new(batch_id: impl Into<String>) -> Self {
        let batch_id = batch_id.into();
        let date = extract_date_from_filename(&batch_id);
        Self { batch_id, date }
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

/// One flagged row in the same-day anomaly digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    /// Serialised as `YYYY-MM-DD`.
    pub date: String,
    pub region: String,
    pub category: Option<String>,
    pub product: String,
    pub sales: f64,
}

/// Anomalies flagged on the report's reference date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDigest {
    pub total_anomalies: usize,
    pub records: Vec<AnomalyRecord>,
}

/// Aggregated sales report, recomputed wholesale on every cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Mean sales per region, rounded to 2 decimals.
    pub region_report_mean: BTreeMap<String, f64>,
    /// Sum of sales per category label, truncated to an integer.
    pub category_report_total: BTreeMap<String, i64>,
    /// Mean sales per category label, rounded to 2 decimals.
    pub category_report_mean: BTreeMap<String, f64>,
    /// Same-day anomaly digest.
    pub today_anomalies: AnomalyDigest,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
