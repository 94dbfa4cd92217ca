//! Runtime layer for the sales monitor.
//!
//! Holds the incremental ingestion state machine and the periodic trigger
//! that drives it in watch mode.

pub mod monitor;
pub mod scheduler;

pub use sales_core as core;
pub use sales_data as data;
