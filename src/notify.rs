//! Telegram alerting
//!
//! Sends the single notification alert through the Telegram Bot API. At most
//! one message is sent per run.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Telegram Bot API base URL
const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Alerting errors
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Bot not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Telegram API error: {0}")]
    ApiError(String),
}

/// Response envelope of the Telegram Bot API
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Telegram bot client
pub struct Notifier {
    client: Client,
    token: String,
}

impl Notifier {
    /// Create a notifier for the given bot token
    pub fn new(token: &str, timeout_secs: u64) -> Result<Self, NotifyError> {
        if token.is_empty() {
            return Err(NotifyError::NotConfigured("empty BOT_TOKEN".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| NotifyError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            token: token.to_string(),
        })
    }

    /// Send one text message to the given chat
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        if chat_id.is_empty() {
            return Err(NotifyError::NotConfigured("empty CHAT_ID".to_string()));
        }

        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_URL, self.token);
        let response = self
            .client
            .post(&url)
            .json(&message_payload(chat_id, text))
            .send()
            .await
            .map_err(|e| NotifyError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| NotifyError::ApiError(format!("invalid response ({}): {}", status, e)))?;

        if !body.ok {
            return Err(NotifyError::ApiError(
                body.description
                    .unwrap_or_else(|| format!("sendMessage failed with status {}", status)),
            ));
        }

        info!("Alert delivered to chat {}", chat_id);
        Ok(())
    }
}

/// Build the `sendMessage` request body
fn message_payload(chat_id: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "chat_id": chat_id,
        "text": text,
    })
}
