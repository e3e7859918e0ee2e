use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::command::CommandHandler;

/// A resolved request for the automation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    /// Backend action key, e.g. `lock/unlock`.
    pub action_key: String,
    /// Backend entity id, e.g. `lock.front_door`.
    pub entity_id: String,
    /// Whether the pair came from the fallback resolver rather than the mapping tables.
    pub used_fallback: bool,
}

/// Why a command could not be turned into an action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionFailure {
    #[error("Unrecognized action.")]
    UnrecognizedAction,
    #[error("Unrecognized target.")]
    UnrecognizedTarget,
    #[error("Fallback resolution failed: {detail}")]
    FallbackExhausted { detail: String },
}

/// Outcome of a single pass through the command resolver.
///
/// Exactly one resolution path is taken per input: a custom command, a backend
/// command, or a failure.
#[derive(Clone)]
pub enum Resolution {
    /// The first token named a registered custom command.
    Custom {
        label: String,
        handler: Arc<dyn CommandHandler>,
    },
    /// An action/target pair for the backend.
    Backend(BackendCommand),
    /// Nothing matched.
    Failure(ResolutionFailure),
}

impl Resolution {
    /// Short tag for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Custom { .. } => "custom",
            Self::Backend(_) => "backend",
            Self::Failure(_) => "failure",
        }
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom { label, .. } => f.debug_struct("Custom").field("label", label).finish(),
            Self::Backend(cmd) => f.debug_tuple("Backend").field(cmd).finish(),
            Self::Failure(reason) => f.debug_tuple("Failure").field(reason).finish(),
        }
    }
}

impl PartialEq for Resolution {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Custom { label: a, .. }, Self::Custom { label: b, .. }) => a == b,
            (Self::Backend(a), Self::Backend(b)) => a == b,
            (Self::Failure(a), Self::Failure(b)) => a == b,
            _ => false,
        }
    }
}

/// Result of a backend invocation. Remote failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply {
    pub success: bool,
    /// Response body or failure description, when the backend produced one.
    pub text: Option<String>,
}

impl BackendReply {
    #[must_use]
    pub fn ok(text: Option<String>) -> Self {
        Self {
            success: true,
            text,
        }
    }

    #[must_use]
    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: Some(text.into()),
        }
    }
}

/// One entity as reported by the backend's state listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub entity_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl EntityInfo {
    /// The `friendly_name` attribute, if the backend supplied one.
    #[must_use]
    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(serde_json::Value::as_str)
    }
}
