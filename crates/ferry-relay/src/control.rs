//! Shared engine control state and the operator control surface.
//!
//! [`EngineControl`] is the single owner of the run/pause gate, the wake
//! signal and the daily counters. The engine, the rate governor and the
//! circuit breaker all hold an `Arc` to the same instance.
//!
//! [`ControlHandle`] is the only thing handed to outer surfaces (HTTP API,
//! chat bots). It can pause, resume and wake the engine, but never writes a
//! mapping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, broadcast, watch};
use tracing::info;

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::error::Result;
use crate::events::EngineEvent;
use crate::store::IdentityStore;

/// Per-day relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DailyCounters {
    /// Items relayed.
    pub successes: u64,
    /// Items that failed (retried next cycle).
    pub failures: u64,
    /// Published chain nodes that carried media.
    pub media_published: u64,
}

/// Counters for the current local day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailySnapshot {
    /// Local date, `YYYY-MM-DD`.
    pub date: String,
    #[serde(flatten)]
    pub counters: DailyCounters,
}

#[derive(Debug)]
struct DailyStats {
    day: NaiveDate,
    counters: DailyCounters,
}

impl DailyStats {
    fn today() -> Self {
        Self {
            day: Local::now().date_naive(),
            counters: DailyCounters::default(),
        }
    }

    fn roll(&mut self, today: NaiveDate) {
        if self.day != today {
            self.day = today;
            self.counters = DailyCounters::default();
        }
    }
}

/// Run gate, wake signal and counters shared by the engine's parts.
#[derive(Debug)]
pub struct EngineControl {
    run_gate: watch::Sender<bool>,
    sleeping: AtomicBool,
    wake: Notify,
    daily: Mutex<DailyStats>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineControl {
    /// Create control state with the gate open.
    pub fn new(events: broadcast::Sender<EngineEvent>) -> Self {
        let (run_gate, _) = watch::channel(true);
        Self {
            run_gate,
            sleeping: AtomicBool::new(false),
            wake: Notify::new(),
            daily: Mutex::new(DailyStats::today()),
            events,
        }
    }

    /// Whether the run gate is open.
    pub fn is_running(&self) -> bool {
        *self.run_gate.borrow()
    }

    /// Open or close the run gate. Returns `true` if the state changed.
    pub(crate) fn set_running(&self, running: bool) -> bool {
        let changed = self.run_gate.send_if_modified(|current| {
            if *current == running {
                false
            } else {
                *current = running;
                true
            }
        });
        if changed {
            ferry_core::metrics::set_gauge("relay_running", if running { 1.0 } else { 0.0 });
        }
        changed
    }

    /// Wait until the run gate is open.
    pub(crate) async fn wait_running(&self) {
        let mut rx = self.run_gate.subscribe();
        // The sender lives as long as self, so this only errors on teardown.
        let _ = rx.wait_for(|running| *running).await;
    }

    /// Whether the engine is in a cooldown or idle sleep.
    pub fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::Acquire)
    }

    pub(crate) fn set_sleeping(&self, sleeping: bool) {
        self.sleeping.store(sleeping, Ordering::Release);
    }

    /// Interrupt the current sleep, if any. A wake with no sleeper is dropped.
    pub fn wake(&self) {
        self.wake.notify_waiters();
    }

    pub(crate) fn wake_signal(&self) -> &Notify {
        &self.wake
    }

    /// Count a relayed item.
    pub fn record_success(&self) {
        let mut daily = self.daily.lock();
        daily.roll(Local::now().date_naive());
        daily.counters.successes += 1;
    }

    /// Count a failed item.
    pub fn record_failure(&self) {
        let mut daily = self.daily.lock();
        daily.roll(Local::now().date_naive());
        daily.counters.failures += 1;
    }

    /// Count a published node that carried media.
    pub fn record_media(&self) {
        let mut daily = self.daily.lock();
        daily.roll(Local::now().date_naive());
        daily.counters.media_published += 1;
    }

    /// Today's counters.
    pub fn daily(&self) -> DailySnapshot {
        let mut daily = self.daily.lock();
        daily.roll(Local::now().date_naive());
        DailySnapshot {
            date: daily.day.format("%Y-%m-%d").to_string(),
            counters: daily.counters,
        }
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Broadcast an event. Having no subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

/// Point-in-time view of the engine for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub sleeping: bool,
    pub breaker: BreakerSnapshot,
    pub mappings: u64,
    pub pending_attempts: u64,
    pub today: DailySnapshot,
}

/// Operator control surface.
///
/// Cheap to clone; every clone drives the same engine.
#[derive(Clone)]
pub struct ControlHandle {
    control: Arc<EngineControl>,
    breaker: Arc<CircuitBreaker>,
    store: Arc<IdentityStore>,
}

impl ControlHandle {
    pub(crate) fn new(
        control: Arc<EngineControl>,
        breaker: Arc<CircuitBreaker>,
        store: Arc<IdentityStore>,
    ) -> Self {
        Self {
            control,
            breaker,
            store,
        }
    }

    /// Close the run gate. The current destination call, if any, completes.
    pub fn pause(&self) -> bool {
        let changed = self.control.set_running(false);
        if changed {
            info!("Relay paused by operator");
            self.control.emit(EngineEvent::Paused);
        }
        changed
    }

    /// Close the circuit breaker (if open) and open the run gate.
    pub fn resume(&self) -> bool {
        let reset = self.breaker.reset();
        let changed = self.control.set_running(true);
        if changed || reset {
            info!(breaker_reset = reset, "Relay resumed by operator");
            self.control.emit(EngineEvent::Resumed);
        }
        changed || reset
    }

    /// Cut the current cooldown or idle sleep short.
    pub fn wake(&self) {
        info!("Wake requested by operator");
        self.control.wake();
    }

    /// Forget a source item so the next cycle relays it again, then wake.
    ///
    /// Returns `false` if the store knew nothing about the item.
    pub fn force_wake(&self, source_id: &str) -> Result<bool> {
        let forgotten = self.store.forget(source_id)?;
        self.wake();
        Ok(forgotten)
    }

    /// Current engine status.
    pub fn status(&self) -> EngineStatus {
        let stats = self.store.stats();
        EngineStatus {
            running: self.control.is_running(),
            sleeping: self.control.is_sleeping(),
            breaker: self.breaker.snapshot(),
            mappings: stats.mappings,
            pending_attempts: stats.pending_attempts,
            today: self.control.daily(),
        }
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.control.subscribe()
    }
}
