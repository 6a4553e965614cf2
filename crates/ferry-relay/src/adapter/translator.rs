//! Translation through an OpenAI-compatible chat completions API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::Translator;
use crate::error::{Error, Result};

/// Default system prompt when none is configured.
pub const DEFAULT_PROMPT: &str = "You translate social media posts into Simplified Chinese. \
Keep names, hashtags (#tag#), emoji and line breaks as they are. \
Reply with the translation only.";

/// Configuration for [`ChatTranslator`].
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// Base URL of the API, e.g. `https://api.deepseek.com/v1`.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// API key. Without one the translator passes text through.
    pub api_key: Option<String>,
    /// System prompt.
    pub prompt: String,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            prompt: DEFAULT_PROMPT.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl TranslatorConfig {
    /// Load from `TRANSLATOR_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            base_url: std::env::var("TRANSLATOR_BASE_URL").unwrap_or(defaults.base_url),
            model: std::env::var("TRANSLATOR_MODEL").unwrap_or(defaults.model),
            api_key: std::env::var("TRANSLATOR_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            prompt: std::env::var("TRANSLATOR_PROMPT").unwrap_or(defaults.prompt),
            timeout: defaults.timeout,
        };

        info!(
            base_url = %config.base_url,
            model = %config.model,
            enabled = config.api_key.is_some(),
            "Translator configuration loaded"
        );
        config
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// Chat-completions translator. Fails open.
pub struct ChatTranslator {
    config: TranslatorConfig,
    client: reqwest::Client,
}

impl ChatTranslator {
    /// Create a translator.
    pub fn new(config: TranslatorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self { config, client })
    }

    async fn request(&self, api_key: &str, text: &str) -> std::result::Result<String, String> {
        let user = format!("Translate the following post:\n<text>\n{text}\n</text>");
        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.config.prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.3,
            max_tokens: 500,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("network error: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("API error {status}: {body}"));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| format!("parse error: {e}"))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| "empty completion".to_string())
    }
}

#[async_trait]
impl Translator for ChatTranslator {
    async fn translate(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return String::new();
        }
        let Some(api_key) = self.config.api_key.as_deref() else {
            return text.to_string();
        };

        match self.request(api_key, text).await {
            Ok(translated) => {
                debug!(chars = translated.chars().count(), "Translated text");
                translated
            }
            Err(e) => {
                warn!(error = %e, "Translation failed, using source text");
                text.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_without_key() {
        let translator = ChatTranslator::new(TranslatorConfig::default()).unwrap();
        assert_eq!(translator.translate("こんにちは").await, "こんにちは");
    }

    #[tokio::test]
    async fn test_empty_text_short_circuits() {
        let translator = ChatTranslator::new(TranslatorConfig {
            api_key: Some("k".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(translator.translate("  \n").await, "");
    }

    #[tokio::test]
    async fn test_fails_open_on_unreachable_api() {
        let translator = ChatTranslator::new(TranslatorConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: Some("k".into()),
            timeout: Duration::from_secs(2),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(translator.translate("source").await, "source");
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "m",
            messages: [
                ChatMessage {
                    role: "system",
                    content: "p",
                },
                ChatMessage {
                    role: "user",
                    content: "u",
                },
            ],
            temperature: 0.3,
            max_tokens: 500,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
        assert_eq!(json["max_tokens"], 500);
    }
}
