//! Per-category anomaly detection over the consolidated dataset.
//!
//! Models are opaque [`Predictor`]s keyed by category label and loaded fresh
//! from a [`ModelSource`] on every pass. Every failure mode degrades to
//! "not anomalous" for the affected rows and is reported as a
//! [`DetectionDiagnostic`]; detection itself never fails.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::dataset::Dataset;

/// Predictor output value marking a row as anomalous.
pub const ANOMALY_SENTINEL: i32 = -1;

// ── Predictor ─────────────────────────────────────────────────────────────────

/// Failure raised by a predictor while scoring a partition.
#[derive(Debug, Error)]
pub enum PredictError {
    /// The predictor returned a different number of labels than inputs.
    #[error("predictor returned {actual} labels for {expected} values")]
    LengthMismatch { expected: usize, actual: usize },

    /// The predictor's parameters cannot score anything.
    #[error("invalid model parameters: {0}")]
    InvalidModel(String),
}

/// A per-category outlier model.
///
/// Given the partition's sales values, returns one label per value where
/// [`ANOMALY_SENTINEL`] marks an anomaly and anything else means normal.
pub trait Predictor: fmt::Debug {
    fn predict(&self, values: &[f64]) -> Result<Vec<i32>, PredictError>;
}

/// Category label → predictor, loaded for a single detection pass.
pub type ModelRegistry = HashMap<String, Box<dyn Predictor>>;

// ── ModelSource ───────────────────────────────────────────────────────────────

/// Why a model registry could not be produced.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),

    #[error("Error loading model from {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Model registry is empty or invalid")]
    Empty,
}

/// Somewhere a [`ModelRegistry`] can be loaded from.
pub trait ModelSource {
    fn load(&self) -> Result<ModelRegistry, ModelLoadError>;
}

// ── JSON model artifact ───────────────────────────────────────────────────────

fn default_iqr_k() -> f64 {
    1.5
}

/// Serialised form of a single category model.
///
/// Artifact shape: `{ "<category label>": { "kind": "range", ... }, ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    /// Anything outside `[lower, upper]` is anomalous.
    Range { lower: f64, upper: f64 },
    /// Anything further than `threshold` standard deviations from `mean`.
    ZScore {
        mean: f64,
        std_dev: f64,
        threshold: f64,
    },
    /// Tukey fences: outside `[q1 - k*iqr, q3 + k*iqr]`.
    Iqr {
        q1: f64,
        q3: f64,
        #[serde(default = "default_iqr_k")]
        k: f64,
    },
}

impl ModelSpec {
    fn bounds(&self) -> Result<(f64, f64), PredictError> {
        let (lower, upper) = match *self {
            ModelSpec::Range { lower, upper } => (lower, upper),
            ModelSpec::ZScore {
                mean,
                std_dev,
                threshold,
            } => {
                if std_dev <= 0.0 || threshold <= 0.0 {
                    return Err(PredictError::InvalidModel(format!(
                        "z-score needs positive std_dev and threshold (got {std_dev}, {threshold})"
                    )));
                }
                (mean - threshold * std_dev, mean + threshold * std_dev)
            }
            ModelSpec::Iqr { q1, q3, k } => {
                let iqr = q3 - q1;
                if iqr < 0.0 || k < 0.0 {
                    return Err(PredictError::InvalidModel(format!(
                        "iqr needs q1 <= q3 and k >= 0 (got q1={q1}, q3={q3}, k={k})"
                    )));
                }
                (q1 - k * iqr, q3 + k * iqr)
            }
        };
        if !lower.is_finite() || !upper.is_finite() || lower > upper {
            return Err(PredictError::InvalidModel(format!(
                "empty normal range [{lower}, {upper}]"
            )));
        }
        Ok((lower, upper))
    }
}

impl Predictor for ModelSpec {
    fn predict(&self, values: &[f64]) -> Result<Vec<i32>, PredictError> {
        let (lower, upper) = self.bounds()?;
        Ok(values
            .iter()
            .map(|&v| {
                if v < lower || v > upper {
                    ANOMALY_SENTINEL
                } else {
                    1
                }
            })
            .collect())
    }
}

/// A JSON file mapping category label to [`ModelSpec`].
#[derive(Debug, Clone)]
pub struct JsonModelFile {
    path: PathBuf,
}

impl JsonModelFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ModelSource for JsonModelFile {
    fn load(&self) -> Result<ModelRegistry, ModelLoadError> {
        if !self.path.exists() {
            return Err(ModelLoadError::NotFound(self.path.clone()));
        }

        let malformed = |message: String| ModelLoadError::Malformed {
            path: self.path.clone(),
            message,
        };

        let content = std::fs::read_to_string(&self.path).map_err(|e| malformed(e.to_string()))?;
        let specs: BTreeMap<String, ModelSpec> =
            serde_json::from_str(&content).map_err(|e| malformed(e.to_string()))?;

        if specs.is_empty() {
            return Err(ModelLoadError::Empty);
        }

        debug!(
            "Loaded {} category models from {}",
            specs.len(),
            self.path.display()
        );
        Ok(specs
            .into_iter()
            .map(|(label, spec)| (label, Box::new(spec) as Box<dyn Predictor>))
            .collect())
    }
}

// ── Diagnostics ───────────────────────────────────────────────────────────────

/// A recovered failure recorded during a detection pass.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionDiagnostic {
    /// No registry could be loaded; every row was reset to normal.
    ModelsUnavailable(String),
    /// No row carries a category label; detection was skipped.
    MissingCategoryLabels,
    /// The registry has no predictor for this category.
    NoPredictor { category: String, rows: usize },
    /// The category's predictor failed; its rows kept their flags.
    PredictionFailed { category: String, reason: String },
    /// Rows without a category label were not scored.
    UnlabelledRows { rows: usize },
}

impl fmt::Display for DetectionDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelsUnavailable(reason) => write!(f, "models unavailable: {reason}"),
            Self::MissingCategoryLabels => write!(f, "no category labels to partition by"),
            Self::NoPredictor { category, rows } => {
                write!(f, "no model for category '{category}' ({rows} rows)")
            }
            Self::PredictionFailed { category, reason } => {
                write!(f, "prediction failed for category '{category}': {reason}")
            }
            Self::UnlabelledRows { rows } => write!(f, "{rows} unlabelled rows not scored"),
        }
    }
}

/// Outcome of one detection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionReport {
    /// Rows flagged anomalous after the pass.
    pub flagged: usize,
    /// Categories whose predictor ran successfully.
    pub categories_scored: usize,
    pub diagnostics: Vec<DetectionDiagnostic>,
}

impl DetectionReport {
    /// `true` when any part of the dataset could not be scored.
    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

// ── AnomalyDetector ───────────────────────────────────────────────────────────

/// Stateless driver applying a model registry to a [`Dataset`].
pub struct AnomalyDetector;

impl AnomalyDetector {
    /// Recompute the anomaly flag across the whole dataset.
    ///
    /// 1. Load the registry; on any load failure reset every flag to `false`.
    /// 2. Without category labels, leave the dataset untouched.
    /// 3. Score each category partition with its predictor. Missing
    ///    predictors and predictor failures leave that partition's flags as
    ///    they were and are recorded as diagnostics.
    pub fn detect(dataset: &mut Dataset, source: &dyn ModelSource) -> DetectionReport {
        let mut report = DetectionReport::default();

        let registry = match source.load() {
            Ok(r) if r.is_empty() => Err(ModelLoadError::Empty),
            other => other,
        };
        let registry = match registry {
            Ok(r) => r,
            Err(e) => {
                match &e {
                    ModelLoadError::Empty => warn!("{}; marking all rows as normal", e),
                    _ => error!("{}; marking all rows as normal", e),
                }
                dataset.set_all_anomalies(false);
                report.diagnostics.push(DetectionDiagnostic::ModelsUnavailable(e.to_string()));
                return report;
            }
        };

        if dataset.is_empty() {
            debug!("dataset is empty; nothing to score");
            return report;
        }

        if !dataset.has_category_labels() {
            warn!("Missing column 'category label'; skipping anomaly detection");
            report.diagnostics.push(DetectionDiagnostic::MissingCategoryLabels);
            report.flagged = dataset.anomaly_count();
            return report;
        }

        let mut partitions: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut unlabelled = 0usize;
        for (idx, record) in dataset.records().iter().enumerate() {
            match &record.category_label {
                Some(label) => partitions.entry(label.clone()).or_default().push(idx),
                None => unlabelled += 1,
            }
        }
        if unlabelled > 0 {
            debug!(rows = unlabelled, "unlabelled rows are not scored");
            report
                .diagnostics
                .push(DetectionDiagnostic::UnlabelledRows { rows: unlabelled });
        }

        for (category, indices) in partitions {
            let Some(predictor) = registry.get(&category) else {
                warn!("No model found for category '{}'", category);
                report.diagnostics.push(DetectionDiagnostic::NoPredictor {
                    category,
                    rows: indices.len(),
                });
                continue;
            };

            let values: Vec<f64> = indices
                .iter()
                .map(|&i| dataset.records()[i].sales_amount)
                .collect();

            let labels = predictor.predict(&values).and_then(|labels| {
                if labels.len() == values.len() {
                    Ok(labels)
                } else {
                    Err(PredictError::LengthMismatch {
                        expected: values.len(),
                        actual: labels.len(),
                    })
                }
            });

            match labels {
                Ok(labels) => {
                    let flags: Vec<bool> = labels.iter().map(|&l| l == ANOMALY_SENTINEL).collect();
                    let hits = flags.iter().filter(|&&f| f).count();
                    dataset.set_anomalies(&indices, &flags);
                    report.categories_scored += 1;
                    debug!(category = %category, rows = indices.len(), anomalies = hits, "category scored");
                }
                Err(e) => {
                    error!("Error predicting anomalies for category '{}': {}", category, e);
                    report.diagnostics.push(DetectionDiagnostic::PredictionFailed {
                        category,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.flagged = dataset.anomaly_count();
        info!("Total anomalies detected: {}", report.flagged);
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
