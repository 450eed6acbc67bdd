//! Telegram Bot API transport.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{MessageTransport, SendOutcome};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Telegram bot credentials.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl TelegramConfig {
    /// Build from optional token and chat id; `None` unless both are set.
    pub fn from_parts(bot_token: Option<String>, chat_id: Option<String>) -> Option<Self> {
        match (bot_token, chat_id) {
            (Some(bot_token), Some(chat_id)) if !bot_token.is_empty() && !chat_id.is_empty() => {
                Some(Self { bot_token, chat_id })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Sends messages through `sendMessage`.
pub struct TelegramTransport {
    client: Client,
    base_url: String,
    config: TelegramConfig,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: TELEGRAM_API_URL.to_string(),
            config,
        })
    }
}

#[async_trait]
impl MessageTransport for TelegramTransport {
    async fn deliver(&self, text: &str) -> Result<SendOutcome> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.config.bot_token);
        let body = json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send Telegram message")?;

        let status = response.status();
        let payload: Option<TelegramResponse> = response.json().await.ok();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(SendOutcome::RateLimited(retry_after(payload.as_ref())));
        }

        match payload {
            Some(p) if status.is_success() && p.ok => {
                debug!(chars = text.chars().count(), "Telegram message delivered");
                Ok(SendOutcome::Delivered)
            }
            Some(p) => bail!(
                "Telegram sendMessage failed: {} - {}",
                status,
                p.description.unwrap_or_default()
            ),
            None => bail!("Telegram sendMessage failed: {} (unreadable response)", status),
        }
    }
}

fn retry_after(payload: Option<&TelegramResponse>) -> Duration {
    payload
        .and_then(|p| p.parameters.as_ref())
        .and_then(|p| p.retry_after)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}
