//! Ferry relay engine.
//!
//! Moves content items from a source platform to a destination platform,
//! preserving quote chains as native references where the destination
//! allows it and as explicit back-links where it doesn't.
//!
//! # Modules
//!
//! - [`store`] - RocksDB identity store (source id to destination id)
//! - [`resolver`] - Quote-chain resolution
//! - [`router`] - Publish strategy selection and text rendering
//! - [`engine`] - Per-item orchestration
//! - [`governor`] / [`breaker`] / [`control`] - Pacing, fatal-error latch, operator control
//! - [`adapter`] - Translator, media and destination seams
//! - [`source`] / [`scheduler`] - Where items come from and the cycle loop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   ItemSource    │  inbox directory of parsed items
//! └────────┬────────┘
//!          │  sorted by timestamp, processed items dropped
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │   RelayEngine   │────►│  resolve_chain   │  IdentityStore lookups
//! └────────┬────────┘     └──────────────────┘
//!          │  per node: translate, transform
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │  PublishRouter  │────►│   Destination    │
//! └────────┬────────┘     └──────────────────┘
//!          │  mapping write, then cooldown
//!          ▼
//! ┌─────────────────┐
//! │  RateGovernor   │  wake-interruptible; CircuitBreaker closes the gate
//! └─────────────────┘
//! ```

pub mod adapter;
pub mod breaker;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod governor;
pub mod resolver;
pub mod router;
pub mod scheduler;
pub mod source;
pub mod store;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use adapter::{
    Destination, MediaTransformer, PassthroughMedia, PassthroughTranslator, PublishError,
    TransformedMedia, Translator,
};
pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use config::RelayConfig;
pub use control::{ControlHandle, DailyCounters, DailySnapshot, EngineControl, EngineStatus};
pub use engine::{Collaborators, RelayEngine, RelayOutcome, RelayState};
pub use events::EngineEvent;
pub use governor::{CooldownEnd, RateGovernor};
pub use resolver::{ChainNode, ChainPlan, NodeRole, resolve_chain};
pub use router::{CredentialsRejected, PublishPlan, PublishRouter, RouteInput, RouteOutcome};
pub use scheduler::{CycleReport, Scheduler};
pub use source::{InboxConfig, InboxSource, ItemSource, SourceStats};
pub use store::{IdentityStats, IdentityStore, PendingAttempt};
