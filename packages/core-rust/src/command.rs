//! Custom command registry.
//!
//! Custom commands are matched on the first token of an input and take
//! precedence over backend resolution.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::CommandContext;

/// Handler for a custom command label.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// One-line description shown by `help`.
    fn description(&self) -> &str;

    /// Run the command. `Ok(Some(text))` is sent back to the originating transport.
    async fn handle(&self, ctx: &CommandContext) -> anyhow::Result<Option<String>>;
}

/// Ordered label -> handler registry.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    handlers: Vec<(String, Arc<dyn CommandHandler>)>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a handler. Labels are single lowercase tokens.
    pub fn register(&mut self, label: &str, handler: Arc<dyn CommandHandler>) {
        let label = label.trim().to_lowercase();
        match self.handlers.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = handler,
            None => self.handlers.push((label, handler)),
        }
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, h)| Arc::clone(h))
    }

    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.handlers.iter().any(|(l, _)| l == label)
    }

    /// Labels in registration order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.handlers.iter().map(|(l, _)| l.clone()).collect()
    }

    /// `(label, description)` pairs in registration order.
    #[must_use]
    pub fn describe(&self) -> Vec<(String, String)> {
        self.handlers
            .iter()
            .map(|(l, h)| (l.clone(), h.description().to_string()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|(l, _)| l))
            .finish()
    }
}
