//! Ferry Serve - operator control surface for the relay engine
//!
//! This crate exposes a small HTTP API over a running relay engine and
//! forwards engine events to the operator. The `ferry` binary wires the
//! engine, the cycle scheduler, metrics and this API into one daemon.
//!
//! # Authentication
//!
//! Everything under `/api/v1` requires Bearer token authentication. Tokens are
//! configured via `FERRY_API_TOKENS` (typically in a `.env` file).
//!
//! # Architecture
//!
//! - **AppState**: the engine's [`ControlHandle`](ferry_relay::ControlHandle) plus configuration
//! - **Auth**: Bearer token middleware for request authentication
//! - **Routes**: health and engine control endpoints
//! - **Notifier**: logs engine events and forwards them to Telegram

mod auth;
mod error;
pub mod notify;
mod routes;
mod state;

pub use self::auth::require_auth;
pub use self::error::ApiError;
pub use self::notify::{Notifier, NotifierConfig};
pub use self::routes::router;
pub use self::state::{AppState, Config};
