use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::{BackendReply, EntityInfo};

/// Inbound message queue for a transport.
///
/// Written from whatever context the transport runs in (polling task, event
/// callback, UI handler) and drained only by the dispatch loop. Neither side
/// ever waits: `push` appends, `pop` returns the oldest message or `None`.
#[derive(Debug, Default)]
pub struct Inbox {
    queue: Mutex<VecDeque<String>>,
    ready: AtomicBool,
}

impl Inbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the back of the queue.
    pub fn push(&self, message: impl Into<String>) {
        self.queue.lock().push_back(message.into());
    }

    /// Remove and return the oldest message.
    pub fn pop(&self) -> Option<String> {
        self.queue.lock().pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Whether the owning transport has a live session.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

/// The single automation backend the hub forwards actions to.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Perform `action_key` on `entity_id`.
    ///
    /// Must not fail for ordinary remote problems: network and HTTP errors are
    /// reported as `BackendReply { success: false, .. }`.
    async fn invoke(&self, action_key: &str, entity_id: &str) -> BackendReply;

    /// List every entity the backend knows about.
    async fn list_entities(&self) -> anyhow::Result<Vec<EntityInfo>>;
}

/// Last-resort resolver consulted when the mapping tables cannot resolve an input.
#[async_trait]
pub trait FallbackResolver: Send + Sync {
    /// Map raw text to `(action_key, entity_id)`.
    ///
    /// `Ok(None)` means "not confident"; `Err` means the resolver itself failed.
    async fn resolve(&self, text: &str) -> anyhow::Result<Option<(String, String)>>;
}
