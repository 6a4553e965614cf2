//! Prometheus metrics helpers for the ferry relay.
//!
//! This module provides centralized metrics initialization and the metric
//! descriptions shared by the relay engine and the daemon.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ferry_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     metrics::counter!("relay_items_total", "outcome" => "relayed").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: `relay_`
//! - Suffix: unit or type (`_total`, `_seconds_total`)
//! - Labels: low-cardinality enums only (`outcome`, `strategy`, `reason`)

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_relay_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_relay_metrics();
    Some(handle)
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves `/metrics` on the given port from a background task and returns
/// once the listener is bound.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

fn register_relay_metrics() {
    // =========================================================================
    // Relay Engine
    // =========================================================================

    describe_counter!(
        "relay_items_total",
        "Items handled by the relay engine (label: outcome)"
    );
    describe_counter!(
        "relay_publish_total",
        "Successful destination publishes (label: strategy)"
    );
    describe_counter!(
        "relay_publish_failures_total",
        "Failed destination publishes (label: reason)"
    );
    describe_counter!(
        "relay_circuit_open_total",
        "Times the circuit breaker latched open on credential rejection"
    );
    describe_gauge!(
        "relay_identity_entries",
        "Source items with a persisted destination identity"
    );

    // =========================================================================
    // Rate Governor
    // =========================================================================

    describe_counter!(
        "relay_cooldown_seconds_total",
        "Seconds spent in post-publish cooldown"
    );
    describe_counter!(
        "relay_cooldowns_interrupted_total",
        "Cooldowns cut short by a wake signal"
    );
    describe_gauge!("relay_running", "Whether the run gate is open (1=run, 0=pause)");

    // =========================================================================
    // Scheduler
    // =========================================================================

    describe_counter!("relay_cycles_total", "Completed fetch cycles");
    describe_gauge!("relay_cycle_items", "Items offered in the current cycle");
}

/// Increment a counter.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();

        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_helpers_do_not_panic() {
        ensure_metrics_init();
        increment("test_counter", 0);
        increment("test_counter", 1);
        set_gauge("test_gauge", 0.0);
        set_gauge("test_gauge", -1.5);
    }

    #[test]
    fn test_register_relay_metrics_does_not_panic() {
        ensure_metrics_init();
        register_relay_metrics();
        register_relay_metrics();
    }
}
