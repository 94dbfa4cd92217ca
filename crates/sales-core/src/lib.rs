//! Shared types for the sales monitor.
//!
//! Holds the record and report data model, the category lookup table,
//! filename-date helpers, the watermark store, CLI settings and the error
//! type used across every crate in the workspace.

pub mod categories;
pub mod error;
pub mod models;
pub mod settings;
pub mod time_utils;
pub mod watermark;

pub use error::{MonitorError, Result};
