//! Relay configuration loaded from environment variables.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Relay engine and scheduler configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Group name used in post titles.
    pub group_name: String,

    /// Author handles to relay (lowercase, no `@`). Empty means everyone.
    pub target_accounts: HashSet<String>,

    /// Display names by lowercase handle, for reply headers.
    pub display_names: HashMap<String, String>,

    /// Minimum spacing after each successful destination write.
    pub cooldown: Duration,

    /// Idle sleep between cycles is drawn from `idle_min..=idle_max`.
    pub idle_min: Duration,
    pub idle_max: Duration,

    /// Sleep after a cycle that offered no items.
    pub empty_sleep: Duration,

    /// Publish videos as video uploads instead of dropping them.
    pub publish_video: bool,

    /// On the first non-empty cycle, relay only the newest item.
    pub first_run_guard: bool,

    /// Character limits.
    pub title_limit: usize,
    pub video_title_limit: usize,
    pub body_limit: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            group_name: "ferry".to_string(),
            target_accounts: HashSet::new(),
            display_names: HashMap::new(),
            cooldown: Duration::from_secs(65),
            idle_min: Duration::from_secs(240),
            idle_max: Duration::from_secs(420),
            empty_sleep: Duration::from_secs(60),
            publish_video: false,
            first_run_guard: true,
            title_limit: 15,
            video_title_limit: 80,
            body_limit: 2000,
        }
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| Error::Config(format!("{key} must be a whole number of seconds, got {v:?}"))),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

impl RelayConfig {
    /// Load configuration from environment variables.
    ///
    /// All optional:
    /// - `FERRY_GROUP_NAME`: title prefix (default: "ferry")
    /// - `FERRY_TARGET_ACCOUNTS`: comma-separated handles to relay (default: all)
    /// - `FERRY_DISPLAY_NAMES`: comma-separated `handle=Name` pairs
    /// - `FERRY_COOLDOWN_SECS`: post-publish cooldown (default: 65)
    /// - `FERRY_IDLE_MIN_SECS` / `FERRY_IDLE_MAX_SECS`: idle range (default: 240/420)
    /// - `FERRY_EMPTY_SLEEP_SECS`: sleep after an empty cycle (default: 60)
    /// - `FERRY_PUBLISH_VIDEO`: upload videos (default: false)
    /// - `FERRY_FIRST_RUN_GUARD`: newest-only first cycle (default: true)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let target_accounts: HashSet<String> = std::env::var("FERRY_TARGET_ACCOUNTS")
            .unwrap_or_default()
            .split(',')
            .map(normalize_handle)
            .filter(|s| !s.is_empty())
            .collect();

        let display_names: HashMap<String, String> = std::env::var("FERRY_DISPLAY_NAMES")
            .unwrap_or_default()
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(handle, name)| (normalize_handle(handle), name.trim().to_string()))
            .filter(|(handle, name)| !handle.is_empty() && !name.is_empty())
            .collect();

        let config = Self {
            group_name: std::env::var("FERRY_GROUP_NAME").unwrap_or(defaults.group_name),
            target_accounts,
            display_names,
            cooldown: env_secs("FERRY_COOLDOWN_SECS", defaults.cooldown)?,
            idle_min: env_secs("FERRY_IDLE_MIN_SECS", defaults.idle_min)?,
            idle_max: env_secs("FERRY_IDLE_MAX_SECS", defaults.idle_max)?,
            empty_sleep: env_secs("FERRY_EMPTY_SLEEP_SECS", defaults.empty_sleep)?,
            publish_video: env_bool("FERRY_PUBLISH_VIDEO", defaults.publish_video),
            first_run_guard: env_bool("FERRY_FIRST_RUN_GUARD", defaults.first_run_guard),
            ..defaults
        };
        config.validate()?;

        tracing::info!(
            group_name = %config.group_name,
            target_accounts = config.target_accounts.len(),
            cooldown_secs = config.cooldown.as_secs(),
            idle_min_secs = config.idle_min.as_secs(),
            idle_max_secs = config.idle_max.as_secs(),
            publish_video = config.publish_video,
            first_run_guard = config.first_run_guard,
            "relay configuration loaded"
        );

        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.idle_min > self.idle_max {
            return Err(Error::Config(format!(
                "idle range is empty: min {}s > max {}s",
                self.idle_min.as_secs(),
                self.idle_max.as_secs()
            )));
        }
        if self.title_limit == 0 || self.video_title_limit == 0 || self.body_limit == 0 {
            return Err(Error::Config("character limits must be positive".to_string()));
        }
        Ok(())
    }

    /// Whether items by this author are relayed.
    pub fn accepts_author(&self, author: &str) -> bool {
        self.target_accounts.is_empty() || self.target_accounts.contains(&normalize_handle(author))
    }

    /// Display name for an author, falling back to `@handle`.
    pub fn display_name(&self, author: &str) -> String {
        let handle = normalize_handle(author);
        self.display_names
            .get(&handle)
            .cloned()
            .unwrap_or_else(|| format!("@{}", author.trim().trim_start_matches('@')))
    }

    /// A random idle duration within the configured range.
    pub fn random_idle(&self) -> Duration {
        if self.idle_min >= self.idle_max {
            return self.idle_min;
        }
        let secs = rand::rng().random_range(self.idle_min.as_secs()..=self.idle_max.as_secs());
        Duration::from_secs(secs)
    }
}
