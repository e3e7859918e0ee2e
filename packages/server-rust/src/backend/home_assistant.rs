//! Home Assistant REST connector.
//!
//! Actions are service calls: `POST {url}/api/services/{action_key}` with
//! `{"entity_id": ...}`. Entities come from `GET {url}/api/states`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hahub_core::{BackendConnector, BackendReply, EntityInfo};
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, info};

use crate::service::config::{
    optional_u64, required_str, ConfigurationError, ServiceSettings,
};
use crate::service::registry::Service;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    base_url: String,
    token: String,
    timeout: Duration,
}

/// Backend service (`"home_assistant"`).
#[derive(Default)]
pub struct HomeAssistantConnector {
    client: reqwest::Client,
    endpoint: Option<Endpoint>,
}

impl HomeAssistantConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn endpoint(&self) -> anyhow::Result<&Endpoint> {
        self.endpoint
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("home_assistant is not configured"))
    }

    fn service_url(endpoint: &Endpoint, action_key: &str) -> String {
        format!(
            "{}/api/services/{}",
            endpoint.base_url,
            action_key.trim_matches('/')
        )
    }
}

/// Reply for a finished service call. Only `200 OK` counts as success.
fn reply_for(status: StatusCode, body: String) -> BackendReply {
    if status == StatusCode::OK {
        BackendReply::ok(Some(body))
    } else if body.trim().is_empty() {
        BackendReply::failed(status.to_string())
    } else {
        BackendReply::failed(format!("{status}: {}", body.trim()))
    }
}

#[async_trait]
impl BackendConnector for HomeAssistantConnector {
    async fn invoke(&self, action_key: &str, entity_id: &str) -> BackendReply {
        let endpoint = match self.endpoint() {
            Ok(endpoint) => endpoint,
            Err(err) => return BackendReply::failed(err.to_string()),
        };
        let url = Self::service_url(endpoint, action_key);
        debug!(%url, entity_id, "calling home assistant service");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&endpoint.token)
            .timeout(endpoint.timeout)
            .json(&json!({ "entity_id": entity_id }))
            .send()
            .await;
        match response {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                reply_for(status, body)
            }
            Err(err) => BackendReply::failed(err.to_string()),
        }
    }

    async fn list_entities(&self) -> anyhow::Result<Vec<EntityInfo>> {
        let endpoint = self.endpoint()?;
        let entities = self
            .client
            .get(format!("{}/api/states", endpoint.base_url))
            .bearer_auth(&endpoint.token)
            .timeout(endpoint.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(entities)
    }
}

#[async_trait]
impl Service for HomeAssistantConnector {
    fn name(&self) -> &'static str {
        "home_assistant"
    }

    fn configure(&mut self, settings: &ServiceSettings) -> Result<(), ConfigurationError> {
        let base_url = required_str(settings, "url")?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigurationError::Invalid {
                field: "url",
                reason: format!("\"{base_url}\" is not an http(s) URL"),
            });
        }
        let token = required_str(settings, "api_key")?;
        let timeout_secs = optional_u64(settings, "timeout_secs")?.unwrap_or(DEFAULT_TIMEOUT_SECS);

        self.endpoint = Some(Endpoint {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        });
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let endpoint = self.endpoint()?;
        info!(url = %endpoint.base_url, "home assistant backend ready");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn as_backend(self: Arc<Self>) -> Option<Arc<dyn BackendConnector>> {
        Some(self)
    }
}
