//! In-process transport for an embedding UI.
//!
//! The UI submits text through the typed handle (`ServiceManager::get`) and
//! collects replies from it.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use hahub_core::Inbox;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::service::config::{ConfigurationError, ServiceSettings};
use crate::service::registry::Service;
use crate::traits::MessageTransport;

/// A reply delivered to the interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceReply {
    pub text: String,
    pub in_response_to: String,
}

#[derive(Default)]
pub struct InterfaceTransport {
    inbox: Inbox,
    replies: Mutex<VecDeque<InterfaceReply>>,
    reply_ready: Notify,
}

impl InterfaceTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a command as if typed by the user.
    pub fn submit(&self, text: &str) {
        self.receive_message(text);
    }

    /// Take every reply delivered so far, oldest first.
    pub fn drain_replies(&self) -> Vec<InterfaceReply> {
        self.replies.lock().drain(..).collect()
    }

    /// Wait for the next reply.
    pub async fn next_reply(&self) -> InterfaceReply {
        loop {
            let next = self.replies.lock().pop_front();
            if let Some(reply) = next {
                return reply;
            }
            self.reply_ready.notified().await;
        }
    }
}

impl MessageTransport for InterfaceTransport {
    fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    fn send_message(&self, text: &str, in_response_to: &str) {
        self.replies.lock().push_back(InterfaceReply {
            text: text.to_string(),
            in_response_to: in_response_to.to_string(),
        });
        self.reply_ready.notify_one();
    }
}

#[async_trait]
impl Service for InterfaceTransport {
    fn name(&self) -> &'static str {
        "interface"
    }

    fn configure(&mut self, _settings: &ServiceSettings) -> Result<(), ConfigurationError> {
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.inbox.set_ready(true);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.inbox.set_ready(false);
        Ok(())
    }

    fn as_transport(self: Arc<Self>) -> Option<Arc<dyn MessageTransport>> {
        Some(self)
    }
}
