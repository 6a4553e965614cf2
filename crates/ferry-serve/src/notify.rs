//! Engine event notifications.
//!
//! Every [`EngineEvent`] is logged. When Telegram credentials are configured
//! a one-line summary is also sent through the Bot API. Delivery failures are
//! logged and dropped; notifying never blocks the engine.

use std::time::Duration;

use ferry_relay::EngineEvent;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Notification settings.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Bot API base URL.
    pub api_base: String,
    pub telegram_token: Option<String>,
    pub telegram_chat: Option<String>,
    /// Prefix on every message, so several relays can share a chat.
    pub label: String,
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            telegram_token: None,
            telegram_chat: None,
            label: "ferry".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl NotifierConfig {
    /// Load from `NOTIFY_TELEGRAM_TOKEN`, `NOTIFY_TELEGRAM_CHAT` and
    /// `NOTIFY_LABEL`. Forwarding needs both token and chat.
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        let config = Self {
            telegram_token: non_empty("NOTIFY_TELEGRAM_TOKEN"),
            telegram_chat: non_empty("NOTIFY_TELEGRAM_CHAT"),
            label: non_empty("NOTIFY_LABEL").unwrap_or(defaults.label),
            ..defaults
        };

        info!(
            telegram = config.telegram_token.is_some() && config.telegram_chat.is_some(),
            "Notifier configuration loaded"
        );
        config
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Forwards engine events to the operator.
pub struct Notifier {
    config: NotifierConfig,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// Whether events are sent anywhere besides the log.
    pub fn is_forwarding(&self) -> bool {
        self.config.telegram_token.is_some() && self.config.telegram_chat.is_some()
    }

    /// Consume events until the engine's channel closes.
    pub async fn run(self, mut events: broadcast::Receiver<EngineEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.deliver(&event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notifier fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Notifier stopped");
    }

    /// Log one event and forward it if configured.
    pub async fn deliver(&self, event: &EngineEvent) {
        let summary = event.summary();
        if event.is_alert() {
            warn!(event = ?event, "{}", summary);
        } else {
            info!("{}", summary);
        }

        if let Err(e) = self.forward(&format_message(&self.config.label, event)).await {
            warn!(error = %e, "Failed to send notification");
        }
    }

    async fn forward(&self, text: &str) -> reqwest::Result<()> {
        let (Some(token), Some(chat)) = (&self.config.telegram_token, &self.config.telegram_chat)
        else {
            return Ok(());
        };

        let url = format!("{}/bot{}/sendMessage", self.config.api_base, token);
        self.client
            .post(url)
            .json(&SendMessage {
                chat_id: chat,
                text,
                disable_web_page_preview: true,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Chat line for an event. Alerts get a warning marker.
pub fn format_message(label: &str, event: &EngineEvent) -> String {
    let marker = if event.is_alert() { "⚠️ " } else { "" };
    format!("{marker}[{label}] {}", event.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::DestinationRef;

    #[test]
    fn test_format_marks_alerts() {
        let alert = EngineEvent::CircuitOpened {
            reason: "cookie expired".to_string(),
        };
        let line = format_message("ferry", &alert);
        assert!(line.starts_with("⚠️ [ferry] "));
        assert!(line.contains("cookie expired"));

        let info = EngineEvent::Published {
            source_id: "s1".to_string(),
            destination: DestinationRef::post("d1"),
            strategy: "repost",
        };
        assert!(format_message("ferry", &info).starts_with("[ferry] Relayed s1"));
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let notifier = Notifier::new(NotifierConfig::default()).unwrap();
        assert!(!notifier.is_forwarding());

        let (tx, rx) = broadcast::channel(4);
        tx.send(EngineEvent::Paused).unwrap();
        tx.send(EngineEvent::Resumed).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), notifier.run(rx))
            .await
            .unwrap();
    }
}
