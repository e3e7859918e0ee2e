//! Fallback resolver backed by an OpenAI-compatible chat-completions endpoint.
//!
//! The model is asked to answer with `<action_key> <entity_id>` or `none`.
//! Anything else is treated as "not confident".

use std::time::Duration;

use async_trait::async_trait;
use hahub_core::FallbackResolver;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::service::config::FallbackConfig;

const SYSTEM_PROMPT: &str = "You translate smart-home requests into Home Assistant service \
calls. Reply with exactly one line of the form `<domain>/<service> <domain>.<object_id>`, for \
example `light/turn_on light.living_room`. If the request is not a device command, reply `none`.";

/// `domain/service domain.object_id`, optionally wrapped in backticks.
const ANSWER_PATTERN: &str =
    r"^`?\s*([a-z0-9_]+/[a-z0-9_]+)\s+([a-z0-9_]+\.[a-z0-9_]+)\s*`?\.?$";

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

pub struct HttpFallbackResolver {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    answer: Regex,
}

impl HttpFallbackResolver {
    /// # Errors
    ///
    /// Returns an error if the answer pattern fails to compile.
    pub fn new(config: &FallbackConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            answer: Regex::new(ANSWER_PATTERN)?,
        })
    }

    /// Extract `(action_key, entity_id)` from the model's answer.
    fn parse_answer(&self, answer: &str) -> Option<(String, String)> {
        let line = answer.lines().map(str::trim).find(|l| !l.is_empty())?;
        let line = line.to_lowercase();
        let captures = self.answer.captures(&line)?;
        Some((captures[1].to_string(), captures[2].to_string()))
    }
}

#[async_trait]
impl FallbackResolver for HttpFallbackResolver {
    async fn resolve(&self, text: &str) -> anyhow::Result<Option<(String, String)>> {
        let request = CompletionRequest {
            model: &self.model,
            temperature: 0.0,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
        };

        let mut builder = self.client.post(&self.url).timeout(self.timeout).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response: CompletionResponse = builder
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let answer = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        let parsed = self.parse_answer(&answer);
        debug!(input = text, answer = %answer.trim(), resolved = parsed.is_some(), "fallback answered");
        Ok(parsed)
    }
}
