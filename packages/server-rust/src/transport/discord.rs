//! Discord REST platform: polls one channel for new messages and replies
//! with a message reference.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::json;

use super::chat::{ChatPlatform, ChatTransport, IncomingMessage};
use crate::service::config::{
    optional_str, optional_u64, required_str, ConfigurationError, ServiceSettings,
};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const PAGE_LIMIT: u32 = 50;

/// Discord transport service (`"discord"`).
pub type DiscordTransport = ChatTransport<DiscordPlatform>;

/// Reply address: the channel and the message being answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordOrigin {
    pub channel_id: String,
    pub message_id: String,
}

#[derive(Debug, Default)]
struct Cursor {
    /// Our own user id, so the bot's replies are not read back as commands.
    bot_id: Option<String>,
    /// Newest message id seen in the channel.
    last_seen: Option<String>,
}

pub struct DiscordPlatform {
    client: reqwest::Client,
    api_base: String,
    token: String,
    channel_id: String,
    poll_interval: Duration,
    cursor: Mutex<Cursor>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    username: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct ChannelMessage {
    id: String,
    #[serde(default)]
    content: String,
    author: User,
}

/// Discord ids are snowflakes: decimal u64s that grow over time.
fn snowflake(id: &str) -> u64 {
    id.parse().unwrap_or(0)
}

impl DiscordPlatform {
    #[must_use]
    pub fn new(token: &str, channel_id: &str, api_base: &str, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            channel_id: channel_id.to_string(),
            poll_interval,
            cursor: Mutex::new(Cursor::default()),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.api_base))
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .timeout(REQUEST_TIMEOUT)
    }

    fn messages_path(&self) -> String {
        format!("/channels/{}/messages", self.channel_id)
    }

    async fn fetch_messages(&self, query: &[(&str, String)]) -> anyhow::Result<Vec<ChannelMessage>> {
        let messages = self
            .get(&self.messages_path())
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(messages)
    }

    /// Turn a page (newest first, as Discord returns it) into commands,
    /// oldest first, and advance the cursor.
    fn accept_page(&self, page: Vec<ChannelMessage>) -> Vec<IncomingMessage<DiscordOrigin>> {
        let mut cursor = self.cursor.lock();
        let mut page = page;
        page.sort_by_key(|m| snowflake(&m.id));

        if let Some(newest) = page.last() {
            let stale = cursor
                .last_seen
                .as_deref()
                .is_some_and(|seen| snowflake(&newest.id) <= snowflake(seen));
            if !stale {
                cursor.last_seen = Some(newest.id.clone());
            }
        }

        page.into_iter()
            .filter(|m| !m.author.bot && Some(&m.author.id) != cursor.bot_id.as_ref())
            .filter_map(|m| {
                let text = m.content.trim();
                (!text.is_empty()).then(|| IncomingMessage {
                    text: text.to_string(),
                    origin: DiscordOrigin {
                        channel_id: self.channel_id.clone(),
                        message_id: m.id.clone(),
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    type Origin = DiscordOrigin;
    const SERVICE_NAME: &'static str = "discord";

    fn from_settings(settings: &ServiceSettings) -> Result<Self, ConfigurationError> {
        let token = required_str(settings, "api_key")?;
        let channel_id = required_str(settings, "channel_id")?;
        if channel_id.parse::<u64>().is_err() {
            return Err(ConfigurationError::Invalid {
                field: "channel_id",
                reason: "expected a numeric channel id".to_string(),
            });
        }
        let api_base =
            optional_str(settings, "api_base")?.unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let poll_ms =
            optional_u64(settings, "poll_interval_ms")?.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        Ok(Self::new(
            &token,
            &channel_id,
            &api_base,
            Duration::from_millis(poll_ms.max(1)),
        ))
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn connect(&self) -> anyhow::Result<String> {
        let me: User = self
            .get("/users/@me")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // Start from the newest existing message so history is not replayed.
        let latest = self
            .fetch_messages(&[("limit", "1".to_string())])
            .await?;
        let mut cursor = self.cursor.lock();
        cursor.bot_id = Some(me.id);
        cursor.last_seen = latest.into_iter().next().map(|m| m.id);
        Ok(me.username)
    }

    async fn poll(&self) -> anyhow::Result<Vec<IncomingMessage<DiscordOrigin>>> {
        let mut query = vec![("limit", PAGE_LIMIT.to_string())];
        let last_seen = self.cursor.lock().last_seen.clone();
        if let Some(after) = last_seen {
            query.push(("after", after));
        }
        let page = self.fetch_messages(&query).await?;
        Ok(self.accept_page(page))
    }

    async fn reply(&self, origin: &DiscordOrigin, text: &str) -> anyhow::Result<()> {
        let body = json!({
            "content": text,
            "message_reference": { "message_id": origin.message_id },
        });
        self.client
            .post(format!(
                "{}/channels/{}/messages",
                self.api_base, origin.channel_id
            ))
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> DiscordPlatform {
        DiscordPlatform::new("tok", "1000", DEFAULT_API_BASE, Duration::from_secs(2))
    }

    fn page(value: serde_json::Value) -> Vec<ChannelMessage> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn settings_require_token_and_channel() {
        let settings: ServiceSettings =
            serde_json::from_value(json!({"api_key": "tok"})).unwrap();
        assert_eq!(
            DiscordPlatform::from_settings(&settings).err(),
            Some(ConfigurationError::Missing { field: "channel_id" })
        );

        let settings: ServiceSettings =
            serde_json::from_value(json!({"api_key": "tok", "channel_id": "general"})).unwrap();
        assert!(matches!(
            DiscordPlatform::from_settings(&settings),
            Err(ConfigurationError::Invalid { field: "channel_id", .. })
        ));

        let settings: ServiceSettings =
            serde_json::from_value(json!({"api_key": "tok", "channel_id": "1234"})).unwrap();
        assert!(DiscordPlatform::from_settings(&settings).is_ok());
    }

    #[test]
    fn page_is_returned_oldest_first_without_bot_messages() {
        let platform = platform();
        platform.cursor.lock().bot_id = Some("1".to_string());

        let messages = platform.accept_page(page(json!([
            {"id": "13", "content": "unlock the garage door", "author": {"id": "7", "username": "ana"}},
            {"id": "12", "content": "Received \"x\"", "author": {"id": "1", "username": "hub"}},
            {"id": "11", "content": "lock the front door", "author": {"id": "7", "username": "ana"}},
            {"id": "10", "content": "beep", "author": {"id": "9", "username": "other", "bot": true}}
        ])));

        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["lock the front door", "unlock the garage door"]);
        assert_eq!(messages[0].origin.message_id, "11");
        assert_eq!(messages[0].origin.channel_id, "1000");
        assert_eq!(platform.cursor.lock().last_seen.as_deref(), Some("13"));
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let platform = platform();
        platform.cursor.lock().last_seen = Some("500".to_string());

        platform.accept_page(page(json!([
            {"id": "20", "content": "late", "author": {"id": "7", "username": "ana"}}
        ])));
        assert_eq!(platform.cursor.lock().last_seen.as_deref(), Some("500"));
    }

    #[test]
    fn snowflakes_compare_numerically() {
        assert!(snowflake("100") > snowflake("99"));
        assert_eq!(snowflake("garbage"), 0);
    }
}
