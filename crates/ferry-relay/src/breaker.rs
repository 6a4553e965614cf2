//! Circuit breaker for destination credential rejection.
//!
//! A rejected credential never heals by retrying, so the first rejection
//! latches the breaker OPEN and closes the run gate in the same critical
//! section. Only an operator resume closes it again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info};

use crate::control::EngineControl;
use crate::events::EngineEvent;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerState {
    /// Destination calls allowed.
    Closed,
    /// Latched after a credential rejection.
    Open,
}

/// Point-in-time breaker view.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub reason: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    /// Total trips since start.
    pub trips: u64,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    reason: Option<String>,
    opened_at: Option<DateTime<Utc>>,
    trips: u64,
}

/// Latching circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    control: Arc<EngineControl>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker driving the given control state.
    pub fn new(control: Arc<EngineControl>) -> Self {
        Self {
            control,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                reason: None,
                opened_at: None,
                trips: 0,
            }),
        }
    }

    /// Whether destination calls are blocked.
    pub fn is_open(&self) -> bool {
        self.inner.lock().state == BreakerState::Open
    }

    /// Latch OPEN and close the run gate.
    ///
    /// Returns `true` on a CLOSED to OPEN transition; tripping an open
    /// breaker changes nothing.
    pub fn trip(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Open {
            return false;
        }

        inner.state = BreakerState::Open;
        inner.reason = Some(reason.clone());
        inner.opened_at = Some(Utc::now());
        inner.trips += 1;
        self.control.set_running(false);
        drop(inner);

        error!(reason = %reason, "Destination rejected credentials, circuit opened");
        ferry_core::metrics::increment("relay_circuit_open_total", 1);
        self.control.emit(EngineEvent::CircuitOpened { reason });
        true
    }

    /// Close the breaker. Does not touch the run gate.
    ///
    /// Returns `true` on an OPEN to CLOSED transition.
    pub(crate) fn reset(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Closed {
            return false;
        }
        inner.state = BreakerState::Closed;
        inner.reason = None;
        inner.opened_at = None;
        info!("Circuit breaker closed");
        true
    }

    /// Current state and reason.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            reason: inner.reason.clone(),
            opened_at: inner.opened_at,
            trips: inner.trips,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;

    fn breaker() -> (Arc<EngineControl>, CircuitBreaker) {
        let (tx, _) = events::channel();
        let control = Arc::new(EngineControl::new(tx));
        let breaker = CircuitBreaker::new(control.clone());
        (control, breaker)
    }

    #[test]
    fn test_trip_latches_and_pauses() {
        let (control, breaker) = breaker();
        assert!(!breaker.is_open());

        assert!(breaker.trip("code -101"));
        assert!(breaker.is_open());
        assert!(!control.is_running());

        let snap = breaker.snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.reason.as_deref(), Some("code -101"));
        assert!(snap.opened_at.is_some());
    }

    #[test]
    fn test_second_trip_is_noop() {
        let (_control, breaker) = breaker();
        assert!(breaker.trip("first"));
        assert!(!breaker.trip("second"));
        let snap = breaker.snapshot();
        assert_eq!(snap.reason.as_deref(), Some("first"));
        assert_eq!(snap.trips, 1);
    }

    #[test]
    fn test_reset_leaves_gate_alone() {
        let (control, breaker) = breaker();
        breaker.trip("401");
        assert!(breaker.reset());
        assert!(!breaker.reset());
        assert!(!breaker.is_open());
        assert!(!control.is_running());
    }

    #[test]
    fn test_trip_emits_event() {
        let (tx, mut rx) = events::channel();
        let control = Arc::new(EngineControl::new(tx));
        let breaker = CircuitBreaker::new(control);
        breaker.trip("403");
        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::CircuitOpened {
                reason: "403".to_string()
            }
        );
    }
}
