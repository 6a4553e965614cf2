//! Application state and configuration.

use std::collections::HashSet;
use std::sync::Arc;

use ferry_relay::ControlHandle;

/// Control API configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8090").
    pub bind_addr: String,

    /// Valid API tokens (loaded from FERRY_API_TOKENS).
    pub api_tokens: HashSet<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `FERRY_API_TOKENS`: Comma-separated list of valid API tokens
    ///
    /// Optional environment variables:
    /// - `FERRY_BIND_ADDR`: Server bind address (default: "0.0.0.0:8090")
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            std::env::var("FERRY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

        let tokens_str = std::env::var("FERRY_API_TOKENS")
            .map_err(|_| anyhow::anyhow!("FERRY_API_TOKENS environment variable is required"))?;

        let api_tokens: HashSet<String> = tokens_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if api_tokens.is_empty() {
            anyhow::bail!("FERRY_API_TOKENS must contain at least one token");
        }

        tracing::info!(
            bind_addr = %bind_addr,
            token_count = api_tokens.len(),
            "control api configuration loaded"
        );

        Ok(Self {
            bind_addr,
            api_tokens,
        })
    }
}

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the running engine.
    pub control: ControlHandle,

    /// Application configuration.
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, control: ControlHandle) -> Self {
        Self {
            control,
            config: Arc::new(config),
        }
    }
}
