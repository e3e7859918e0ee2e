//! Three-stage command resolution.
//!
//! 1. **Custom** (`CommandRegistry`): first token of the lowercased input names
//!    a registered label.
//! 2. **Deterministic** (`MappingSnapshot`): action phrases longest-first,
//!    entity phrases in table order, both by substring.
//! 3. **Fallback** (`FallbackResolver`): only when stage 2 left a gap.
//!
//! Stages short-circuit. Each call reads one snapshot of the tables and one of
//! the command registry; writers publish whole new snapshots (copy-on-write),
//! so a resolution never sees a half-applied mutation.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::debug;

use crate::command::{CommandHandler, CommandRegistry};
use crate::mapping::MappingSnapshot;
use crate::traits::FallbackResolver;
use crate::types::{BackendCommand, Resolution, ResolutionFailure};

/// Outcome of the two local (non-fallback) stages.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalResolution {
    /// Stage 1 or stage 2 produced a final answer.
    Resolved(Resolution),
    /// Stage 2 found at most one half of the pair; `missing` is the failure to
    /// report if the fallback cannot help.
    Unresolved { missing: ResolutionFailure },
}

/// Owns the mapping tables, the custom command registry, and the fallback.
pub struct CommandResolver {
    tables: ArcSwap<MappingSnapshot>,
    commands: ArcSwap<CommandRegistry>,
    fallback: Option<Arc<dyn FallbackResolver>>,
    /// Serializes writers; readers never take it.
    write_lock: Mutex<()>,
}

impl CommandResolver {
    #[must_use]
    pub fn new(tables: MappingSnapshot) -> Self {
        Self {
            tables: ArcSwap::from_pointee(tables),
            commands: ArcSwap::from_pointee(CommandRegistry::new()),
            fallback: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Install the stage-3 resolver.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackResolver>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[must_use]
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Current tables. The returned snapshot never changes.
    #[must_use]
    pub fn snapshot(&self) -> Arc<MappingSnapshot> {
        self.tables.load_full()
    }

    /// Current custom command registry.
    #[must_use]
    pub fn commands(&self) -> Arc<CommandRegistry> {
        self.commands.load_full()
    }

    /// Registered custom command labels, in registration order.
    #[must_use]
    pub fn command_labels(&self) -> Vec<String> {
        self.commands.load().labels()
    }

    pub fn register_command(&self, label: &str, handler: Arc<dyn CommandHandler>) {
        let _guard = self.write_lock.lock();
        let mut next = (**self.commands.load()).clone();
        next.register(label, handler);
        self.commands.store(Arc::new(next));
    }

    /// Insert or replace an action phrase. Returns `false` for a blank phrase.
    pub fn add_action(&self, phrase: &str, action_key: &str) -> bool {
        self.update_tables(|tables| tables.actions.upsert(phrase, action_key))
    }

    /// Insert or replace a target phrase. Returns `false` for a blank phrase.
    pub fn add_target(&self, phrase: &str, entity_id: &str) -> bool {
        self.update_tables(|tables| tables.entities.upsert(phrase, entity_id))
    }

    /// Remove an action phrase. Returns whether it existed.
    pub fn remove_action(&self, phrase: &str) -> bool {
        self.update_tables(|tables| tables.actions.remove(phrase))
    }

    /// Remove a target phrase. Returns whether it existed.
    pub fn remove_target(&self, phrase: &str) -> bool {
        self.update_tables(|tables| tables.entities.remove(phrase))
    }

    fn update_tables<R>(&self, mutate: impl FnOnce(&mut MappingSnapshot) -> R) -> R {
        let _guard = self.write_lock.lock();
        let mut next = (**self.tables.load()).clone();
        let result = mutate(&mut next);
        self.tables.store(Arc::new(next));
        result
    }

    /// Run stages 1 and 2 against the current snapshots.
    ///
    /// Pure with respect to `(input, tables, commands)`.
    #[must_use]
    pub fn resolve_local(&self, input: &str) -> LocalResolution {
        let lower = input.to_lowercase();
        let commands = self.commands.load();
        let tables = self.tables.load();

        if let Some(label) = lower.split_whitespace().next() {
            if let Some(handler) = commands.get(label) {
                return LocalResolution::Resolved(Resolution::Custom {
                    label: label.to_string(),
                    handler,
                });
            }
        }

        let found = tables.match_phrases(&lower);
        match (found.action, found.target) {
            (Some((_, action_key)), Some((_, entity_id))) => {
                LocalResolution::Resolved(Resolution::Backend(BackendCommand {
                    action_key: action_key.to_string(),
                    entity_id: entity_id.to_string(),
                    used_fallback: false,
                }))
            }
            (None, _) => LocalResolution::Unresolved {
                missing: ResolutionFailure::UnrecognizedAction,
            },
            (Some(_), None) => LocalResolution::Unresolved {
                missing: ResolutionFailure::UnrecognizedTarget,
            },
        }
    }

    /// Resolve `input` through all three stages.
    pub async fn resolve(&self, input: &str) -> Resolution {
        let missing = match self.resolve_local(input) {
            LocalResolution::Resolved(resolution) => return resolution,
            LocalResolution::Unresolved { missing } => missing,
        };

        let Some(fallback) = &self.fallback else {
            return Resolution::Failure(missing);
        };

        debug!(input, "mapping tables incomplete, consulting fallback");
        match fallback.resolve(input).await {
            Ok(Some((action_key, entity_id))) => Resolution::Backend(BackendCommand {
                action_key,
                entity_id,
                used_fallback: true,
            }),
            Ok(None) => Resolution::Failure(missing),
            Err(err) => Resolution::Failure(ResolutionFailure::FallbackExhausted {
                detail: err.to_string(),
            }),
        }
    }
}

impl Default for CommandResolver {
    fn default() -> Self {
        Self::new(MappingSnapshot::default())
    }
}
