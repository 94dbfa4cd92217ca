use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the sales monitor.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// A file could not be opened or read from disk.
    #[error("Error reading file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file or directory could not be created or written.
    #[error("Error writing file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed or produced.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A batch file exists but its tabular content could not be decoded.
    #[error("Failed to parse batch {path}: {message}")]
    BatchParse { path: PathBuf, message: String },

    /// A batch file lacks one of the required columns.
    #[error("Batch {path} is missing column '{column}'")]
    MissingColumn { path: PathBuf, column: String },

    /// A watermark name did not match the configured filename pattern.
    #[error("Invalid filename format: {name}. Must match pattern: {pattern}")]
    InvalidWatermark { name: String, pattern: String },

    /// A configured filename pattern is not a valid regular expression.
    #[error("Invalid filename pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// The expected data directory does not exist.
    #[error("Directory not found: {0}")]
    DataPathNotFound(PathBuf),

    /// Settings that parse individually but contradict each other.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MonitorError {
    /// `true` for rejected input (bad watermark name, bad pattern) as opposed
    /// to environmental failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MonitorError::InvalidWatermark { .. } | MonitorError::InvalidPattern { .. }
        )
    }

    /// `true` for failures that originate in the filesystem.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            MonitorError::FileRead { .. }
                | MonitorError::FileWrite { .. }
                | MonitorError::DataPathNotFound(_)
        )
    }
}

/// Convenience alias used throughout the sales monitor crates.
pub type Result<T> = std::result::Result<T, MonitorError>;
