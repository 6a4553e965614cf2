//! Rate governor: post-publish cooldowns, idle sleeps and the run gate.
//!
//! Every successful destination write is followed by a cooldown. A wake
//! signal may cut a cooldown short, but the signal is never stored: a wake
//! arriving while nothing sleeps is dropped, so back-to-back publishes can
//! never skip their cooldown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::control::EngineControl;

/// How a sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownEnd {
    /// Slept the full duration.
    Elapsed,
    /// Cut short by a wake signal.
    Woken,
}

/// Paces destination writes and gates the engine on pause.
#[derive(Debug)]
pub struct RateGovernor {
    control: Arc<EngineControl>,
    cooldowns: AtomicU64,
}

impl RateGovernor {
    /// Create a governor over the shared control state.
    pub fn new(control: Arc<EngineControl>) -> Self {
        Self {
            control,
            cooldowns: AtomicU64::new(0),
        }
    }

    /// Sleep after a successful publish.
    pub async fn cooldown(&self, duration: Duration) -> CooldownEnd {
        debug!(seconds = duration.as_secs_f64(), "Cooldown started");
        let start = Instant::now();
        let end = self.interruptible_sleep(duration).await;

        self.cooldowns.fetch_add(1, Ordering::Relaxed);
        ferry_core::metrics::increment("relay_cooldown_seconds_total", start.elapsed().as_secs());
        if end == CooldownEnd::Woken {
            info!("Cooldown interrupted by wake signal");
            ferry_core::metrics::increment("relay_cooldowns_interrupted_total", 1);
        }
        end
    }

    /// Sleep between fetch cycles.
    pub async fn idle(&self, duration: Duration) -> CooldownEnd {
        debug!(seconds = duration.as_secs(), "Idle sleep started");
        let end = self.interruptible_sleep(duration).await;
        if end == CooldownEnd::Woken {
            info!("Idle sleep interrupted by wake signal");
        }
        end
    }

    /// Return once the run gate is open. Blocks indefinitely while paused.
    pub async fn await_runnable(&self) {
        if self.control.is_running() {
            return;
        }
        info!("Relay paused, waiting for resume");
        self.control.wait_running().await;
        info!("Relay resumed");
    }

    /// Completed cooldowns since start.
    pub fn cooldown_count(&self) -> u64 {
        self.cooldowns.load(Ordering::Relaxed)
    }

    async fn interruptible_sleep(&self, duration: Duration) -> CooldownEnd {
        // Register interest before flagging as sleeping, so a wake that
        // observes the flag is guaranteed to reach this waiter.
        let notified = self.control.wake_signal().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        self.control.set_sleeping(true);
        let end = tokio::select! {
            _ = tokio::time::sleep(duration) => CooldownEnd::Elapsed,
            _ = &mut notified => CooldownEnd::Woken,
        };
        self.control.set_sleeping(false);
        end
    }
}
