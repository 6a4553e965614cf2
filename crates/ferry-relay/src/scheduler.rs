//! Periodic fetch-and-relay loop.
//!
//! Each cycle fetches from the source, drops processed items, orders the rest
//! by timestamp and hands them to the engine one at a time. A failing or
//! panicking item is logged and counted; the cycle moves on. Between cycles
//! the loop idles for a random interval (a fixed shorter one when the
//! source was empty); a wake signal cuts the idle short.
//!
//! On the very first non-empty cycle the first-run guard marks everything
//! but the newest item processed, so a fresh deployment does not flood the
//! destination with backlog.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::engine::{RelayEngine, RelayOutcome};
use crate::error::Result;
use crate::source::ItemSource;

/// Summary of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Unprocessed items offered to the engine.
    pub offered: usize,
    pub relayed: usize,
    pub already_relayed: usize,
    pub filtered: usize,
    /// Aborted, errored or panicked.
    pub failed: usize,
    pub halted: usize,
    /// Older items skipped by the first-run guard.
    pub skipped_first_run: usize,
}

/// Drives a [`RelayEngine`] from an [`ItemSource`].
pub struct Scheduler {
    engine: Arc<RelayEngine>,
    source: Box<dyn ItemSource>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    /// Create a scheduler. Send `true` on the shutdown channel to stop it.
    pub fn new(
        engine: Arc<RelayEngine>,
        source: Box<dyn ItemSource>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            source,
            shutdown,
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run cycles until shutdown.
    pub async fn run(mut self) -> Result<()> {
        info!(source = self.source.name(), "Scheduler started");
        let recovered = self.engine.recover_attempts()?;
        if recovered > 0 {
            warn!(recovered, "Recovered unfinished publish attempts");
        }

        let mut cycles = 0u64;
        while !self.stopping() {
            let report = match self.run_cycle().await {
                Ok(report) => report,
                Err(e) => {
                    error!(error = %e, "Cycle failed");
                    CycleReport::default()
                }
            };
            cycles += 1;
            ferry_core::metrics::increment("relay_cycles_total", 1);

            if self.stopping() {
                break;
            }

            let config = self.engine.config();
            let sleep = if report.offered == 0 {
                config.empty_sleep
            } else {
                config.random_idle()
            };
            info!(
                cycle = cycles,
                offered = report.offered,
                relayed = report.relayed,
                failed = report.failed,
                idle_secs = sleep.as_secs(),
                "Cycle complete"
            );

            tokio::select! {
                _ = self.engine.governor().idle(sleep) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.engine.store().flush()?;
        info!(cycles, "Scheduler stopped");
        Ok(())
    }

    /// Fetch once and relay every unprocessed item.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let fetched = self.source.fetch().await?;
        let store = self.engine.store().clone();

        let mut seen = HashSet::new();
        let mut pending = Vec::with_capacity(fetched.len());
        for item in fetched {
            if !seen.insert(item.id.clone()) {
                continue;
            }
            if store.has_processed(&item.id)? {
                continue;
            }
            pending.push(item);
        }
        pending.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let mut report = CycleReport::default();
        if pending.is_empty() {
            ferry_core::metrics::set_gauge("relay_cycle_items", 0.0);
            return Ok(report);
        }

        if self.engine.config().first_run_guard && !store.first_run_completed()? {
            let newest = pending.len() - 1;
            for item in pending.drain(..newest) {
                store.mark_processed(&item.id)?;
                report.skipped_first_run += 1;
            }
            store.mark_first_run_completed()?;
            info!(
                skipped = report.skipped_first_run,
                "First run: relaying only the newest item"
            );
        }

        report.offered = pending.len();
        ferry_core::metrics::set_gauge("relay_cycle_items", pending.len() as f64);

        for item in &pending {
            if self.stopping() {
                info!("Shutdown requested, leaving remaining items for next run");
                break;
            }

            // Blocks while paused or while the breaker is open.
            tokio::select! {
                _ = self.engine.governor().await_runnable() => {}
                _ = self.shutdown.changed() => break,
            }

            let outcome = AssertUnwindSafe(self.engine.relay(item))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(outcome)) => {
                    debug!(source_id = %item.id, outcome = outcome.label(), "Item handled");
                    match outcome {
                        RelayOutcome::Relayed { .. } => report.relayed += 1,
                        RelayOutcome::AlreadyRelayed { .. } => report.already_relayed += 1,
                        RelayOutcome::Filtered => report.filtered += 1,
                        RelayOutcome::Aborted { .. } => report.failed += 1,
                        RelayOutcome::Halted { .. } => report.halted += 1,
                    }
                }
                Ok(Err(e)) => {
                    error!(source_id = %item.id, error = %e, "Item failed");
                    self.engine.record_item_error(&item.id, &e.to_string());
                    report.failed += 1;
                }
                Err(_) => {
                    error!(source_id = %item.id, "Item panicked; continuing with next item");
                    self.engine.record_item_error(&item.id, "internal error");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
