//! Persistence of the last-processed batch identifier.
//!
//! The record is a single text value: the file name of the most recently
//! processed batch. Writes are validated against a filename pattern and
//! replace the record atomically; a missing or empty record reads as
//! "no prior state".

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info};

use crate::error::{MonitorError, Result};
use crate::models::Watermark;

/// Default pattern a watermark name must fully match.
pub const DEFAULT_WATERMARK_PATTERN: &str = r"[\w\-.]+\.csv";

// ── WatermarkStore ────────────────────────────────────────────────────────────

/// File-backed store for the [`Watermark`].
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
    pattern: Regex,
    pattern_source: String,
}

impl WatermarkStore {
    /// Create a store at `path` validating names against `pattern`.
    ///
    /// The pattern is anchored on both ends, so it must match the whole name.
    pub fn new(path: impl Into<PathBuf>, pattern: &str) -> Result<Self> {
        let anchored = format!("^(?:{})$", pattern);
        let compiled = Regex::new(&anchored).map_err(|e| MonitorError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            path: path.into(),
            pattern: compiled,
            pattern_source: pattern.to_string(),
        })
    }

    /// Create a store using [`DEFAULT_WATERMARK_PATTERN`].
    pub fn with_default_pattern(path: impl Into<PathBuf>) -> Self {
        Self::new(path, DEFAULT_WATERMARK_PATTERN).expect("default pattern is valid")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` when `name` is acceptable as a watermark.
    pub fn is_valid_name(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }

    /// Read the persisted watermark.
    ///
    /// A missing or empty record yields `Ok(None)`. Any other read failure
    /// (permissions, the path being a directory) is a
    /// [`MonitorError::FileRead`].
    pub fn read(&self) -> Result<Option<Watermark>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Watermark record not found at {}; starting without prior state",
                    self.path.display()
                );
                return Ok(None);
            }
            Err(source) => {
                return Err(MonitorError::FileRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            info!(
                "Watermark record {} exists but is empty",
                self.path.display()
            );
            return Ok(None);
        }

        debug!(batch = %trimmed, "watermark read");
        Ok(Some(Watermark::new(trimmed)))
    }

    /// Persist `name` as the new watermark.
    ///
    /// Fails with [`MonitorError::InvalidWatermark`] before touching the disk
    /// when `name` does not match the pattern. The parent directory is
    /// created if missing and the record is replaced via temp-file + rename.
    pub fn write(&self, name: &str) -> Result<()> {
        if !self.is_valid_name(name) {
            return Err(MonitorError::InvalidWatermark {
                name: name.to_string(),
                pattern: self.pattern_source.clone(),
            });
        }

        let write_err = |source| MonitorError::FileWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, name).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;

        info!(batch = %name, "watermark advanced");
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
