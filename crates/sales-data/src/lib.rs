//! Data layer for the sales monitor.
//!
//! Discovers and reads dated batch files, holds the consolidated dataset,
//! scores it with per-category anomaly models, aggregates the trailing
//! window into a report and persists or archives that report.

pub mod aggregator;
pub mod dataset;
pub mod detector;
pub mod reader;
pub mod report;

pub use sales_core as core;
