//! Periodic cycle trigger.
//!
//! Moves an [`IncrementalMonitor`] into a tokio task that runs a cycle right
//! away and then once per interval, forwarding every outcome through an
//! `mpsc` channel. Cycles never overlap: the next tick is only awaited after
//! the previous cycle has returned.

use std::time::Duration;

use chrono::{Local, NaiveDate};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use crate::monitor::{CycleError, CycleOutcome, IncrementalMonitor, MonitorState};

// ── Public types ──────────────────────────────────────────────────────────────

/// The result of one scheduled cycle.
#[derive(Debug)]
pub struct CycleReport {
    /// 1-based cycle counter.
    pub cycle: u64,
    /// Reference date the cycle reported against.
    pub as_of: NaiveDate,
    pub outcome: Result<CycleOutcome, CycleError>,
    /// Monitor state once the cycle returned.
    pub state: MonitorState,
}

fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

// ── MonitorScheduler ──────────────────────────────────────────────────────────

pub struct MonitorScheduler {
    interval: Duration,
    today: fn() -> NaiveDate,
}

impl MonitorScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            today: local_today,
        }
    }

    /// Override how the reference date is computed for each cycle.
    pub fn with_clock(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Spawn the loop. Returns the report stream and a handle to stop it.
    pub fn start(self, monitor: IncrementalMonitor) -> (mpsc::Receiver<CycleReport>, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(16);

        let handle = tokio::spawn(async move {
            self.run(monitor, tx).await;
        });

        (rx, SchedulerHandle { handle })
    }

    async fn run(self, mut monitor: IncrementalMonitor, tx: mpsc::Sender<CycleReport>) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle = 0u64;

        loop {
            // first tick completes immediately
            interval.tick().await;

            if tx.is_closed() {
                tracing::debug!("cycle report channel closed; stopping scheduler");
                break;
            }

            cycle += 1;
            let as_of = (self.today)();
            tracing::debug!(cycle, %as_of, "scheduled cycle starting");
            let outcome = monitor.run_cycle(as_of);

            let report = CycleReport {
                cycle,
                as_of,
                outcome,
                state: monitor.state(),
            };
            if tx.send(report).await.is_err() {
                tracing::debug!("cycle report receiver dropped; stopping scheduler");
                break;
            }
        }
    }
}

// ── SchedulerHandle ───────────────────────────────────────────────────────────

/// Handle to the background scheduler task.
pub struct SchedulerHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop. A cycle already running finishes first.
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
