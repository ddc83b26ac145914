//! Telegram gateway — Bot API calls for outbound messages and documents,
//! plus extraction of inbound messages from webhook updates.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};

use crate::channels::{Gateway, IncomingMessage};
use crate::error::ChannelError;
use crate::form::session::UserId;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Public Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram gateway — talks to the Bot API over HTTPS.
pub struct TelegramGateway {
    bot_token: Option<SecretString>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramGateway {
    /// Create a gateway. Every outbound request is bounded by `timeout`.
    ///
    /// Without a token the gateway still constructs, and every send fails
    /// with [`ChannelError::AuthFailed`].
    pub fn new(bot_token: Option<SecretString>, api_base: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build Telegram HTTP client with timeout: {e}");
                reqwest::Client::new()
            });

        Self {
            bot_token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn api_url(&self, method: &str) -> Result<String, ChannelError> {
        let token = self
            .bot_token
            .as_ref()
            .ok_or_else(|| ChannelError::AuthFailed {
                name: "telegram".into(),
                reason: "no bot token configured".into(),
            })?;
        Ok(format!(
            "{}/bot{}/{method}",
            self.api_base,
            token.expose_secret()
        ))
    }

    /// Send a text message, split into chunks under Telegram's limit.
    async fn send_message(&self, chat_id: UserId, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    async fn send_message_chunk(&self, chat_id: UserId, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage")?)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage returned {status}: {err}"),
            });
        }

        Ok(())
    }

    /// Send a document from bytes (in-memory).
    async fn send_document_bytes(
        &self,
        chat_id: UserId,
        file_bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<(), ChannelError> {
        let size = file_bytes.len();
        let part = Part::bytes(file_bytes).file_name(file_name.to_string());

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);

        let resp = self
            .client
            .post(self.api_url("sendDocument")?)
            .multipart(form)
            .send()
            .await
            .map_err(send_error)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendDocument returned {status}: {err}"),
            });
        }

        tracing::info!(user_id = chat_id, bytes = size, "Telegram document sent: {file_name}");
        Ok(())
    }
}

#[async_trait]
impl Gateway for TelegramGateway {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_text(&self, user_id: UserId, text: &str) -> Result<(), ChannelError> {
        self.send_message(user_id, text).await
    }

    async fn send_document(
        &self,
        user_id: UserId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<(), ChannelError> {
        self.send_document_bytes(user_id, bytes, filename).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn send_error(e: reqwest::Error) -> ChannelError {
    if e.is_timeout() {
        ChannelError::Timeout {
            name: "telegram".into(),
        }
    } else {
        ChannelError::SendFailed {
            name: "telegram".into(),
            reason: e.to_string(),
        }
    }
}

/// Extract the chat id and text from a webhook update.
///
/// Updates without a `message`, a numeric chat id or a text body yield
/// `None` and are acknowledged without further processing.
pub fn parse_update(update: &serde_json::Value) -> Option<IncomingMessage> {
    let message = update.get("message")?;

    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64)?;

    let text = message.get("text").and_then(serde_json::Value::as_str)?;

    Some(IncomingMessage::new(chat_id, text))
}

/// Split a message into chunks of at most `max_chars` characters.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    loop {
        let Some((limit, _)) = remaining.char_indices().nth(max_chars) else {
            chunks.push(remaining.to_string());
            break;
        };

        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
        if remaining.is_empty() {
            break;
        }
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
