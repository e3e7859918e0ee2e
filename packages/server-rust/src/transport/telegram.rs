//! Telegram Bot API platform (`getMe`, `getUpdates`, `sendMessage`).

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::chat::{ChatPlatform, ChatTransport, IncomingMessage};
use crate::service::config::{
    optional_str, optional_u64, required_str, ConfigurationError, ServiceSettings,
};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Telegram transport service (`"telegram"`).
pub type TelegramTransport = ChatTransport<TelegramPlatform>;

/// Reply address: the chat and the message being answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelegramOrigin {
    pub chat_id: i64,
    pub message_id: i64,
}

pub struct TelegramPlatform {
    client: reqwest::Client,
    api_base: String,
    token: String,
    poll_interval: Duration,
    /// Next `update_id` to request.
    offset: AtomicI64,
}

// Wire types. Only the fields used are modelled.

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    username: Option<String>,
    first_name: String,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

impl TelegramPlatform {
    #[must_use]
    pub fn new(token: &str, api_base: &str, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            poll_interval,
            offset: AtomicI64::new(0),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> anyhow::Result<T> {
        let envelope: Envelope<T> = request
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;
        match envelope {
            Envelope {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            Envelope { description, .. } => anyhow::bail!(
                "telegram API error: {}",
                description.unwrap_or_else(|| "no description".to_string())
            ),
        }
    }

    /// Turn a batch of updates into text messages and advance the offset.
    fn accept_updates(&self, updates: Vec<Update>) -> Vec<IncomingMessage<TelegramOrigin>> {
        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.offset.fetch_max(last + 1, Ordering::SeqCst);
        }
        updates
            .into_iter()
            .filter_map(|update| update.message)
            .filter_map(|message| {
                let text = message.text?;
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                Some(IncomingMessage {
                    text: text.to_string(),
                    origin: TelegramOrigin {
                        chat_id: message.chat.id,
                        message_id: message.message_id,
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    type Origin = TelegramOrigin;
    const SERVICE_NAME: &'static str = "telegram";

    fn from_settings(settings: &ServiceSettings) -> Result<Self, ConfigurationError> {
        let token = required_str(settings, "api_key")?;
        let api_base =
            optional_str(settings, "api_base")?.unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let poll_ms =
            optional_u64(settings, "poll_interval_ms")?.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        Ok(Self::new(&token, &api_base, Duration::from_millis(poll_ms.max(1))))
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn connect(&self) -> anyhow::Result<String> {
        let me: User = self
            .call(self.client.get(self.method_url("getMe")))
            .await?;
        Ok(me.username.unwrap_or(me.first_name))
    }

    async fn poll(&self) -> anyhow::Result<Vec<IncomingMessage<TelegramOrigin>>> {
        let offset = self.offset.load(Ordering::SeqCst);
        let updates: Vec<Update> = self
            .call(
                self.client
                    .get(self.method_url("getUpdates"))
                    .query(&[("offset", offset), ("timeout", 0)]),
            )
            .await?;
        Ok(self.accept_updates(updates))
    }

    async fn reply(&self, origin: &TelegramOrigin, text: &str) -> anyhow::Result<()> {
        let body = json!({
            "chat_id": origin.chat_id,
            "text": text,
            "reply_to_message_id": origin.message_id,
        });
        let _sent: serde_json::Value = self
            .call(self.client.post(self.method_url("sendMessage")).json(&body))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn platform() -> TelegramPlatform {
        TelegramPlatform::new("123:abc", "https://api.telegram.org/", Duration::from_secs(1))
    }

    #[test]
    fn method_url_embeds_token() {
        assert_eq!(
            platform().method_url("getMe"),
            "https://api.telegram.org/bot123:abc/getMe"
        );
    }

    #[test]
    fn settings_require_api_key() {
        assert_eq!(
            TelegramPlatform::from_settings(&ServiceSettings::new()).err(),
            Some(ConfigurationError::Missing { field: "api_key" })
        );

        let settings: ServiceSettings = serde_json::from_value(json!({
            "api_key": "t",
            "api_base": "http://localhost:8081",
            "poll_interval_ms": 250
        }))
        .unwrap();
        let platform = TelegramPlatform::from_settings(&settings).unwrap();
        assert_eq!(platform.api_base, "http://localhost:8081");
        assert_eq!(platform.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn updates_become_messages_and_advance_offset() {
        let updates: Vec<Update> = serde_json::from_value(json!([
            {"update_id": 41, "message": {"message_id": 1, "chat": {"id": 99}, "text": "lock the front door"}},
            {"update_id": 42, "message": {"message_id": 2, "chat": {"id": 99}}},
            {"update_id": 43},
            {"update_id": 44, "message": {"message_id": 3, "chat": {"id": 5}, "text": "  help "}}
        ]))
        .unwrap();

        let platform = platform();
        let messages = platform.accept_updates(updates);

        assert_eq!(
            messages,
            vec![
                IncomingMessage {
                    text: "lock the front door".to_string(),
                    origin: TelegramOrigin { chat_id: 99, message_id: 1 },
                },
                IncomingMessage {
                    text: "help".to_string(),
                    origin: TelegramOrigin { chat_id: 5, message_id: 3 },
                },
            ]
        );
        assert_eq!(platform.offset.load(Ordering::SeqCst), 45);

        // An empty batch leaves the offset alone.
        assert!(platform.accept_updates(Vec::new()).is_empty());
        assert_eq!(platform.offset.load(Ordering::SeqCst), 45);
    }

    #[test]
    fn envelope_error_carries_description() {
        let envelope: Envelope<Vec<Update>> = serde_json::from_value(json!({
            "ok": false,
            "error_code": 401,
            "description": "Unauthorized"
        }))
        .unwrap();
        assert!(!envelope.ok);
        assert_eq!(envelope.description.as_deref(), Some("Unauthorized"));
    }
}
