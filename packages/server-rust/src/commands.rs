//! Built-in custom commands.
//!
//! | label          | effect                                         |
//! |----------------|------------------------------------------------|
//! | `exit`         | stop the hub                                   |
//! | `help`         | list commands and known phrases                |
//! | `listdevices`  | list entities reported by the backend          |
//! | `addaction`    | `addaction <phrase> = <action_key>`            |
//! | `addtarget`    | `addtarget <phrase> = <entity_id>`             |
//! | `removeaction` | `removeaction <phrase>`                        |
//! | `removetarget` | `removetarget <phrase>`                        |

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use hahub_core::{CommandContext, CommandHandler, CommandResolver};

/// Register every built-in command on `resolver`.
pub fn register_builtin_commands(resolver: &CommandResolver) {
    resolver.register_command("exit", Arc::new(ExitCommand));
    resolver.register_command("help", Arc::new(HelpCommand));
    resolver.register_command("listdevices", Arc::new(ListDevicesCommand));
    resolver.register_command("addaction", Arc::new(AddMapping(Table::Actions)));
    resolver.register_command("addtarget", Arc::new(AddMapping(Table::Targets)));
    resolver.register_command("removeaction", Arc::new(RemoveMapping(Table::Actions)));
    resolver.register_command("removetarget", Arc::new(RemoveMapping(Table::Targets)));
}

// ---------------------------------------------------------------------------
// exit / help / listdevices
// ---------------------------------------------------------------------------

pub struct ExitCommand;

#[async_trait]
impl CommandHandler for ExitCommand {
    fn description(&self) -> &str {
        "stop the hub"
    }

    async fn handle(&self, ctx: &CommandContext) -> anyhow::Result<Option<String>> {
        ctx.shutdown.request();
        Ok(Some("Shutting down.".to_string()))
    }
}

pub struct HelpCommand;

#[async_trait]
impl CommandHandler for HelpCommand {
    fn description(&self) -> &str {
        "list commands and known phrases"
    }

    async fn handle(&self, ctx: &CommandContext) -> anyhow::Result<Option<String>> {
        let mut out = String::from("Commands:");
        for (label, description) in ctx.resolver.commands().describe() {
            let _ = write!(out, "\n  {label}: {description}");
        }

        let tables = ctx.resolver.snapshot();
        let actions: Vec<_> = tables.actions.iter().map(|(phrase, _)| phrase).collect();
        let targets: Vec<_> = tables.entities.iter().map(|(phrase, _)| phrase).collect();
        let _ = write!(out, "\nActions: {}", actions.join(", "));
        let _ = write!(out, "\nTargets: {}", targets.join(", "));
        Ok(Some(out))
    }
}

pub struct ListDevicesCommand;

#[async_trait]
impl CommandHandler for ListDevicesCommand {
    fn description(&self) -> &str {
        "list entities reported by the backend"
    }

    async fn handle(&self, ctx: &CommandContext) -> anyhow::Result<Option<String>> {
        let Some(backend) = &ctx.backend else {
            anyhow::bail!("no automation backend is loaded");
        };
        let entities = backend.list_entities().await?;
        if entities.is_empty() {
            return Ok(Some("The backend reported no devices.".to_string()));
        }

        let mut out = format!("{} device(s):", entities.len());
        for entity in &entities {
            match entity.friendly_name() {
                Some(name) => {
                    let _ = write!(out, "\n  {} ({name}): {}", entity.entity_id, entity.state);
                }
                None => {
                    let _ = write!(out, "\n  {}: {}", entity.entity_id, entity.state);
                }
            }
        }
        Ok(Some(out))
    }
}

// ---------------------------------------------------------------------------
// Mapping edits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Actions,
    Targets,
}

impl Table {
    fn noun(self) -> &'static str {
        match self {
            Self::Actions => "action",
            Self::Targets => "target",
        }
    }

    fn value_name(self) -> &'static str {
        match self {
            Self::Actions => "action_key",
            Self::Targets => "entity_id",
        }
    }
}

pub struct AddMapping(pub Table);

#[async_trait]
impl CommandHandler for AddMapping {
    fn description(&self) -> &str {
        match self.0 {
            Table::Actions => "map a phrase to an action: addaction <phrase> = <action_key>",
            Table::Targets => "map a phrase to an entity: addtarget <phrase> = <entity_id>",
        }
    }

    async fn handle(&self, ctx: &CommandContext) -> anyhow::Result<Option<String>> {
        let table = self.0;
        let Some((phrase, value)) = ctx
            .args
            .split_once('=')
            .map(|(p, v)| (p.trim(), v.trim()))
            .filter(|(p, v)| !p.is_empty() && !v.is_empty() && !v.contains(char::is_whitespace))
        else {
            anyhow::bail!(
                "usage: add{} <phrase> = <{}>",
                table.noun(),
                table.value_name()
            );
        };

        let stored = match table {
            Table::Actions => ctx.resolver.add_action(phrase, value),
            Table::Targets => ctx.resolver.add_target(phrase, value),
        };
        anyhow::ensure!(stored, "cannot map a blank {}", table.noun());
        Ok(Some(format!(
            "Mapped {} \"{}\" to {value}",
            table.noun(),
            phrase.to_lowercase()
        )))
    }
}

pub struct RemoveMapping(pub Table);

#[async_trait]
impl CommandHandler for RemoveMapping {
    fn description(&self) -> &str {
        match self.0 {
            Table::Actions => "forget an action phrase: removeaction <phrase>",
            Table::Targets => "forget a target phrase: removetarget <phrase>",
        }
    }

    async fn handle(&self, ctx: &CommandContext) -> anyhow::Result<Option<String>> {
        let table = self.0;
        let phrase = ctx.args.trim();
        if phrase.is_empty() {
            anyhow::bail!("usage: remove{} <phrase>", table.noun());
        }

        let removed = match table {
            Table::Actions => ctx.resolver.remove_action(phrase),
            Table::Targets => ctx.resolver.remove_target(phrase),
        };
        let phrase = phrase.to_lowercase();
        Ok(Some(if removed {
            format!("Removed {} \"{phrase}\"", table.noun())
        } else {
            format!("No {} named \"{phrase}\"", table.noun())
        }))
    }
}

#[cfg(test)]
mod tests {
    use hahub_core::{
        default_mappings, BackendConnector, BackendReply, EntityInfo, Resolution, ShutdownHandle,
    };
    use serde_json::json;

    use super::*;

    struct FixedBackend(Vec<EntityInfo>);

    #[async_trait]
    impl BackendConnector for FixedBackend {
        async fn invoke(&self, _action_key: &str, _entity_id: &str) -> BackendReply {
            BackendReply::ok(None)
        }

        async fn list_entities(&self) -> anyhow::Result<Vec<EntityInfo>> {
            Ok(self.0.clone())
        }
    }

    fn resolver() -> Arc<CommandResolver> {
        let resolver = Arc::new(CommandResolver::new(default_mappings()));
        register_builtin_commands(&resolver);
        resolver
    }

    async fn run(
        resolver: &Arc<CommandResolver>,
        backend: Option<Arc<dyn BackendConnector>>,
        message: &str,
        shutdown: &ShutdownHandle,
    ) -> anyhow::Result<Option<String>> {
        let Resolution::Custom { handler, .. } = resolver.resolve(message).await else {
            panic!("{message:?} did not resolve to a custom command");
        };
        let ctx = CommandContext::new(message, shutdown.clone(), backend, Arc::clone(resolver));
        handler.handle(&ctx).await
    }

    #[tokio::test]
    async fn exit_requests_shutdown() {
        let resolver = resolver();
        let shutdown = ShutdownHandle::new();
        run(&resolver, None, "exit", &shutdown).await.unwrap();
        assert!(shutdown.is_requested());
    }

    #[tokio::test]
    async fn addaction_then_resolves() {
        let resolver = resolver();
        let shutdown = ShutdownHandle::new();

        let reply = run(&resolver, None, "addaction Turn Off = light/turn_off", &shutdown)
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some("Mapped action \"turn off\" to light/turn_off"));

        assert_eq!(
            resolver.resolve("turn off the living room").await,
            Resolution::Backend(hahub_core::BackendCommand {
                action_key: "light/turn_off".to_string(),
                entity_id: "light.living_room".to_string(),
                used_fallback: false,
            })
        );
    }

    #[tokio::test]
    async fn addtarget_rejects_malformed_args() {
        let resolver = resolver();
        let shutdown = ShutdownHandle::new();
        for message in ["addtarget den", "addtarget = light.den", "addtarget den = light den"] {
            let err = run(&resolver, None, message, &shutdown).await.unwrap_err();
            assert_eq!(err.to_string(), "usage: addtarget <phrase> = <entity_id>");
        }
    }

    #[tokio::test]
    async fn remove_reports_whether_phrase_existed() {
        let resolver = resolver();
        let shutdown = ShutdownHandle::new();

        let reply = run(&resolver, None, "removetarget Garage Door", &shutdown)
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some("Removed target \"garage door\""));

        let reply = run(&resolver, None, "removetarget garage door", &shutdown)
            .await
            .unwrap();
        assert_eq!(reply.as_deref(), Some("No target named \"garage door\""));
    }

    #[tokio::test]
    async fn help_lists_commands_and_phrases() {
        let resolver = resolver();
        let reply = run(&resolver, None, "help", &ShutdownHandle::new())
            .await
            .unwrap()
            .unwrap();

        assert!(reply.starts_with("Commands:\n  exit: stop the hub"));
        assert!(reply.contains("Actions: lock, unlock, open, turn on, toggle"));
        assert!(reply.contains("Targets: all, front door, garage door, living room"));
    }

    #[tokio::test]
    async fn listdevices_without_backend_fails() {
        let resolver = resolver();
        let err = run(&resolver, None, "listdevices", &ShutdownHandle::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no automation backend is loaded");
    }

    #[tokio::test]
    async fn listdevices_formats_entities() {
        let resolver = resolver();
        let entities: Vec<EntityInfo> = serde_json::from_value(json!([
            {"entity_id": "lock.front_door", "state": "locked", "attributes": {"friendly_name": "Front Door"}},
            {"entity_id": "light.den", "state": "off"}
        ]))
        .unwrap();
        let backend: Arc<dyn BackendConnector> = Arc::new(FixedBackend(entities));

        let reply = run(&resolver, Some(backend), "listdevices", &ShutdownHandle::new())
            .await
            .unwrap();
        assert_eq!(
            reply.as_deref(),
            Some("2 device(s):\n  lock.front_door (Front Door): locked\n  light.den: off")
        );
    }
}
