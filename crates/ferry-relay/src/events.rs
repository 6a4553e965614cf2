//! Engine events for notifiers.
//!
//! The engine broadcasts an [`EngineEvent`] for every outcome an operator
//! may care about. Nothing in the engine waits on subscribers: a lagging or
//! absent receiver never slows the relay down.

use ferry_core::DestinationRef;
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the event channel. Slow subscribers skip older events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something that happened inside the relay engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A chain node was published.
    Published {
        source_id: String,
        destination: DestinationRef,
        strategy: &'static str,
    },
    /// An item could not be relayed this cycle and will be retried.
    ItemFailed { source_id: String, reason: String },
    /// The destination rejected our credentials; the engine is paused.
    CircuitOpened { reason: String },
    /// The run gate was closed.
    Paused,
    /// The run gate was opened.
    Resumed,
    /// A publish started before a crash never recorded its outcome.
    UnknownAttempt { source_id: String, started_at: i64 },
}

impl EngineEvent {
    /// One-line human readable summary, used for chat notifications.
    pub fn summary(&self) -> String {
        match self {
            Self::Published {
                source_id,
                destination,
                strategy,
            } => format!("Relayed {source_id} as {destination} ({strategy})"),
            Self::ItemFailed { source_id, reason } => {
                format!("Failed to relay {source_id}: {reason}")
            }
            Self::CircuitOpened { reason } => {
                format!("Destination rejected credentials, relay paused: {reason}")
            }
            Self::Paused => "Relay paused".to_string(),
            Self::Resumed => "Relay resumed".to_string(),
            Self::UnknownAttempt {
                source_id,
                started_at,
            } => format!(
                "Publish of {source_id} (started at {started_at}) has unknown outcome; \
                 check the destination for a duplicate"
            ),
        }
    }

    /// Whether an operator should be alerted, rather than just informed.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpened { .. } | Self::UnknownAttempt { .. }
        )
    }
}

/// Create an event channel.
pub fn channel() -> (
    broadcast::Sender<EngineEvent>,
    broadcast::Receiver<EngineEvent>,
) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}
