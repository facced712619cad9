//! Telegram Bot API notification channel.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::ChannelError;
use crate::notify::{NotificationChannel, render_alert};
use crate::queue::AlertJob;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Sends alerts to one user's chat through a bot.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot_token: SecretString,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: SecretString, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Same bot and HTTP client, different chat.
    pub fn for_chat(&self, chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            ..self.clone()
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Point at a different Bot API server (self-hosted or a test double).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    async fn send_chunk(&self, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                // reqwest errors embed the URL, which embeds the token.
                reason: e.without_url().to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage returned {status}: {detail}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, alert: &AlertJob) -> Result<(), ChannelError> {
        for chunk in split_message(&render_alert(alert), TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_chunk(&chunk).await?;
        }
        Ok(())
    }
}

/// Split text into chunks of at most `max_len` bytes, preferring newline
/// then space boundaries, never splitting inside a UTF-8 character.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.len() > max_len {
        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        if limit == 0 {
            limit = remaining.chars().next().map_or(remaining.len(), char::len_utf8);
        }
        let window = &remaining[..limit];
        let split_at = match window.rfind('\n').or_else(|| window.rfind(' ')) {
            Some(0) | None => limit,
            Some(i) => i,
        };
        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }
    if !remaining.is_empty() || chunks.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_uses_base_and_token() {
        let ch = TelegramNotifier::new(SecretString::from("123:ABC"), "42".into())
            .with_api_base("http://127.0.0.1:9000/");
        assert_eq!(
            ch.api_url("sendMessage"),
            "http://127.0.0.1:9000/bot123:ABC/sendMessage"
        );
    }

    #[test]
    fn for_chat_keeps_bot_and_api_base() {
        let base = TelegramNotifier::new(SecretString::from("123:ABC"), "42".into())
            .with_api_base("http://127.0.0.1:9000");
        let other = base.for_chat("777");
        assert_eq!(other.chat_id(), "777");
        assert_eq!(base.chat_id(), "42");
        assert_eq!(other.api_url("sendMessage"), base.api_url("sendMessage"));
    }

    #[test]
    fn split_message_short() {
        assert_eq!(split_message("Hello", 4096), vec!["Hello"]);
    }

    #[test]
    fn split_message_prefers_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks, vec!["a".repeat(2000), "b".repeat(3000)]);
    }

    #[test]
    fn split_message_without_break_points() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        // Each 'é' is two bytes; a 5-byte limit must not cut one in half.
        let chunks = split_message("éééééé", 5);
        assert!(chunks.iter().all(|c| c.len() <= 5));
        assert_eq!(chunks.concat(), "éééééé");
    }

    #[tokio::test]
    async fn unreachable_api_is_send_failure() {
        let ch = TelegramNotifier::new(SecretString::from("t"), "1".into())
            .with_api_base("http://127.0.0.1:1");
        let alert = AlertJob {
            agent_id: "a".into(),
            user_id: "u".into(),
            alert_type: "test".into(),
            message: "hello".into(),
            data: None,
        };
        let err = ch.notify(&alert).await.unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed { .. }));
        assert!(!err.to_string().contains("bott/"));
    }
}
