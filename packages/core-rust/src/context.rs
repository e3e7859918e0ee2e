use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::resolver::CommandResolver;
use crate::traits::BackendConnector;

/// Cloneable, process-wide stop request.
///
/// The dispatch loop polls it once per tick; custom commands and the signal
/// handler set it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the dispatch loop to stop after the current tick.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Everything a custom command handler may touch.
///
/// Handlers receive this explicitly instead of capturing dispatcher state.
#[derive(Clone)]
pub struct CommandContext {
    /// The message as the transport received it.
    pub message: String,
    /// Arguments after the command label, from the original message.
    pub args: String,
    pub shutdown: ShutdownHandle,
    pub backend: Option<Arc<dyn BackendConnector>>,
    pub resolver: Arc<CommandResolver>,
}

impl CommandContext {
    /// Build a context for `message`, splitting off the leading label.
    #[must_use]
    pub fn new(
        message: &str,
        shutdown: ShutdownHandle,
        backend: Option<Arc<dyn BackendConnector>>,
        resolver: Arc<CommandResolver>,
    ) -> Self {
        let trimmed = message.trim();
        let args = trimmed
            .split_once(char::is_whitespace)
            .map(|(_, rest)| rest.trim().to_string())
            .unwrap_or_default();
        Self {
            message: message.to_string(),
            args,
            shutdown,
            backend,
            resolver,
        }
    }
}
