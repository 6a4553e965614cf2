//! Error types for the relay engine.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while relaying.
///
/// Destination-side publish failures are not represented here: they are
/// [`PublishError`](crate::adapter::PublishError) values that the engine turns
/// into chain-breaks or a circuit-breaker trip.
#[derive(Error, Debug)]
pub enum Error {
    /// RocksDB error.
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid content item.
    #[error("item error: {0}")]
    Item(#[from] ferry_core::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity store error.
    #[error("Store error: {0}")]
    Store(String),

    /// Item source error.
    #[error("Source error: {0}")]
    Source(String),
}
