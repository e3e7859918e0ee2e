//! The central dispatch loop.
//!
//! Each tick visits every transport once, in registration order, and handles
//! at most one message from each ready transport: resolve it, act on the
//! resolution, and reply on the transport the message came from.

use std::sync::Arc;
use std::time::Duration;

use hahub_core::{
    BackendConnector, BackendReply, CommandContext, CommandResolver, Resolution, ShutdownHandle,
};
use tracing::{debug, error, info, warn};

use crate::service::manager::ServiceManager;
use crate::traits::MessageTransport;

/// Reply text when a backend command arrives and no backend is registered.
pub const NO_BACKEND: &str = "no automation backend is loaded";

/// Dispatch loop settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Sleep after a tick that handled nothing.
    pub idle_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(20),
        }
    }
}

pub struct Dispatcher {
    resolver: Arc<CommandResolver>,
    shutdown: ShutdownHandle,
    config: DispatchConfig,
}

impl Dispatcher {
    #[must_use]
    pub fn new(resolver: Arc<CommandResolver>, shutdown: ShutdownHandle) -> Self {
        Self {
            resolver,
            shutdown,
            config: DispatchConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// One pass over `transports`. Returns how many messages were handled.
    pub async fn tick(
        &self,
        transports: &[(&'static str, Arc<dyn MessageTransport>)],
        backend: Option<&Arc<dyn BackendConnector>>,
    ) -> usize {
        let mut handled = 0;
        for (name, transport) in transports {
            if !transport.is_ready() {
                continue;
            }
            let Some(message) = transport.inbox().pop() else {
                continue;
            };
            self.handle(name, &**transport, backend, &message).await;
            handled += 1;
        }
        handled
    }

    async fn handle(
        &self,
        name: &str,
        transport: &dyn MessageTransport,
        backend: Option<&Arc<dyn BackendConnector>>,
        message: &str,
    ) {
        let resolution = self.resolver.resolve(message).await;
        debug!(transport = name, message, resolution = ?resolution, "resolved message");

        match resolution {
            Resolution::Custom { label, handler } => {
                transport.send_message(&format!("Running command \"{label}\""), message);
                let ctx = CommandContext::new(
                    message,
                    self.shutdown.clone(),
                    backend.cloned(),
                    Arc::clone(&self.resolver),
                );
                match handler.handle(&ctx).await {
                    Ok(Some(text)) => transport.send_message(&text, message),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(transport = name, command = %label, error = %err, "command failed");
                        transport.send_message(&format!("Command \"{label}\" failed: {err}"), message);
                    }
                }
            }
            Resolution::Backend(command) => {
                let reply = match backend {
                    Some(backend) => backend.invoke(&command.action_key, &command.entity_id).await,
                    None => BackendReply::failed(NO_BACKEND),
                };
                if reply.success {
                    transport.send_message(&format!("Received \"{message}\""), message);
                } else {
                    let detail = reply.text.unwrap_or_default();
                    warn!(
                        transport = name,
                        action = %command.action_key,
                        entity = %command.entity_id,
                        %detail,
                        "backend request failed"
                    );
                    transport.send_message(
                        &format!("Backend failed to perform the request: {detail}"),
                        message,
                    );
                }
            }
            Resolution::Failure(reason) => {
                transport.send_message(
                    &format!("Failed to process command \"{message}\": {reason}"),
                    message,
                );
            }
        }
    }

    /// Loop until shutdown is requested. Returns the number of ticks run.
    pub async fn run_loop(
        &self,
        transports: &[(&'static str, Arc<dyn MessageTransport>)],
        backend: Option<&Arc<dyn BackendConnector>>,
    ) -> u64 {
        let mut ticks = 0_u64;
        while !self.shutdown.is_requested() {
            let handled = self.tick(transports, backend).await;
            ticks += 1;
            if handled == 0 {
                tokio::time::sleep(self.config.idle_interval).await;
            }
        }
        ticks
    }

    /// Run the loop over `manager`'s services, then stop them.
    ///
    /// `stop_all` runs exactly once when the loop ends, whether it ended by
    /// shutdown request or by panic.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop task panicked or was cancelled.
    pub async fn run(self, manager: Arc<ServiceManager>) -> anyhow::Result<()> {
        if manager.backend().is_none() {
            warn!("no automation backend loaded; backend commands will fail");
        }

        let loop_task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move {
                let transports = manager.message_transports();
                let backend = manager.backend();
                info!(transports = transports.len(), "dispatch loop running");
                self.run_loop(&transports, backend.as_ref()).await
            }
        });

        let outcome = loop_task.await;
        info!("shutting down");
        manager.stop_all().await;

        match outcome {
            Ok(ticks) => {
                info!(ticks, "dispatch loop finished");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "dispatch loop aborted");
                Err(anyhow::anyhow!("dispatch loop aborted: {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use hahub_core::{default_mappings, CommandHandler, EntityInfo, FallbackResolver, Inbox};
    use parking_lot::Mutex;

    use super::*;
    use crate::commands::register_builtin_commands;
    use crate::service::config::{ConfigurationError, HubConfig, ServiceSettings};
    use crate::service::lifecycle::ServiceState;
    use crate::service::registry::Service;
    use crate::transport::InterfaceTransport;

    /// Transport that records replies as `(text, in_response_to)`.
    #[derive(Default)]
    struct RecordingTransport {
        inbox: Inbox,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        fn ready() -> Arc<Self> {
            let transport = Self::default();
            transport.inbox.set_ready(true);
            Arc::new(transport)
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().clone()
        }
    }

    impl MessageTransport for RecordingTransport {
        fn inbox(&self) -> &Inbox {
            &self.inbox
        }

        fn send_message(&self, text: &str, in_response_to: &str) {
            self.sent
                .lock()
                .push((text.to_string(), in_response_to.to_string()));
        }
    }

    /// Backend that records invocations and answers with a fixed reply.
    struct RecordingBackend {
        calls: Mutex<Vec<(String, String)>>,
        reply: BackendReply,
    }

    impl RecordingBackend {
        fn answering(reply: BackendReply) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                reply,
            })
        }
    }

    #[async_trait]
    impl BackendConnector for RecordingBackend {
        async fn invoke(&self, action_key: &str, entity_id: &str) -> BackendReply {
            self.calls
                .lock()
                .push((action_key.to_string(), entity_id.to_string()));
            self.reply.clone()
        }

        async fn list_entities(&self) -> anyhow::Result<Vec<EntityInfo>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl Service for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording_backend"
        }

        fn configure(&mut self, _settings: &ServiceSettings) -> Result<(), ConfigurationError> {
            Ok(())
        }

        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn as_backend(self: Arc<Self>) -> Option<Arc<dyn BackendConnector>> {
            Some(self)
        }
    }

    struct NoIdea;

    #[async_trait]
    impl FallbackResolver for NoIdea {
        async fn resolve(&self, _text: &str) -> anyhow::Result<Option<(String, String)>> {
            Ok(None)
        }
    }

    struct Panics;

    #[async_trait]
    impl CommandHandler for Panics {
        fn description(&self) -> &str {
            "panics"
        }

        async fn handle(&self, _ctx: &CommandContext) -> anyhow::Result<Option<String>> {
            panic!("handler blew up");
        }
    }

    fn dispatcher() -> Dispatcher {
        let resolver = Arc::new(CommandResolver::new(default_mappings()).with_fallback(Arc::new(NoIdea)));
        register_builtin_commands(&resolver);
        Dispatcher::new(resolver, ShutdownHandle::new())
    }

    fn as_transports(
        transports: &[(&'static str, Arc<RecordingTransport>)],
    ) -> Vec<(&'static str, Arc<dyn MessageTransport>)> {
        transports
            .iter()
            .map(|(name, t)| (*name, Arc::clone(t) as Arc<dyn MessageTransport>))
            .collect()
    }

    #[tokio::test]
    async fn lock_front_door_reaches_backend() {
        let dispatcher = dispatcher();
        let transport = RecordingTransport::ready();
        let backend = RecordingBackend::answering(BackendReply::ok(None));
        let backend_dyn: Arc<dyn BackendConnector> = backend.clone();
        transport.receive_message("lock the front door");

        let handled = dispatcher
            .tick(&as_transports(&[("t", Arc::clone(&transport))]), Some(&backend_dyn))
            .await;

        assert_eq!(handled, 1);
        assert_eq!(
            *backend.calls.lock(),
            vec![("lock/lock".to_string(), "lock.front_door".to_string())]
        );
        assert_eq!(
            transport.sent(),
            vec![(
                "Received \"lock the front door\"".to_string(),
                "lock the front door".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn unrecognized_action_is_reported() {
        let dispatcher = dispatcher();
        let transport = RecordingTransport::ready();
        let backend = RecordingBackend::answering(BackendReply::ok(None));
        let backend_dyn: Arc<dyn BackendConnector> = backend.clone();
        transport.receive_message("do a backflip");

        dispatcher
            .tick(&as_transports(&[("t", Arc::clone(&transport))]), Some(&backend_dyn))
            .await;

        assert!(backend.calls.lock().is_empty());
        assert_eq!(
            transport.sent()[0].0,
            "Failed to process command \"do a backflip\": Unrecognized action."
        );
    }

    #[tokio::test]
    async fn backend_failure_text_is_relayed() {
        let dispatcher = dispatcher();
        let transport = RecordingTransport::ready();
        let backend: Arc<dyn BackendConnector> =
            RecordingBackend::answering(BackendReply::failed("401: Unauthorized"));
        transport.receive_message("toggle the living room");

        dispatcher
            .tick(&as_transports(&[("t", Arc::clone(&transport))]), Some(&backend))
            .await;

        assert_eq!(
            transport.sent()[0].0,
            "Backend failed to perform the request: 401: Unauthorized"
        );
    }

    #[tokio::test]
    async fn missing_backend_is_an_explicit_failure() {
        let dispatcher = dispatcher();
        let transport = RecordingTransport::ready();
        transport.receive_message("open the garage door");

        dispatcher
            .tick(&as_transports(&[("t", Arc::clone(&transport))]), None)
            .await;

        assert_eq!(
            transport.sent()[0].0,
            format!("Backend failed to perform the request: {NO_BACKEND}")
        );
    }

    #[tokio::test]
    async fn one_message_per_transport_per_tick() {
        let dispatcher = dispatcher();
        let a = RecordingTransport::ready();
        let b = RecordingTransport::ready();
        for i in 1..=3 {
            a.receive_message(&format!("a{i}"));
            b.receive_message(&format!("b{i}"));
        }
        let transports = as_transports(&[("a", Arc::clone(&a)), ("b", Arc::clone(&b))]);

        for expected_left in [2, 1, 0] {
            assert_eq!(dispatcher.tick(&transports, None).await, 2);
            assert_eq!(a.inbox().len(), expected_left);
            assert_eq!(b.inbox().len(), expected_left);
        }
        assert_eq!(dispatcher.tick(&transports, None).await, 0);

        let replied_to = |t: &RecordingTransport| -> Vec<String> {
            t.sent().into_iter().map(|(_, origin)| origin).collect()
        };
        assert_eq!(replied_to(&a), vec!["a1", "a2", "a3"]);
        assert_eq!(replied_to(&b), vec!["b1", "b2", "b3"]);
    }

    #[tokio::test]
    async fn not_ready_transport_is_skipped_until_ready() {
        let dispatcher = dispatcher();
        let transport = Arc::new(RecordingTransport::default());
        transport.receive_message("help");
        let transports = as_transports(&[("t", Arc::clone(&transport))]);

        assert_eq!(dispatcher.tick(&transports, None).await, 0);
        assert_eq!(transport.inbox().len(), 1);

        transport.inbox().set_ready(true);
        assert_eq!(dispatcher.tick(&transports, None).await, 1);
        assert!(transport.inbox().is_empty());
    }

    #[tokio::test]
    async fn custom_command_is_acknowledged_then_answered() {
        let dispatcher = dispatcher();
        let transport = RecordingTransport::ready();
        transport.receive_message("removeaction open");

        dispatcher
            .tick(&as_transports(&[("t", Arc::clone(&transport))]), None)
            .await;

        let texts: Vec<_> = transport.sent().into_iter().map(|(text, _)| text).collect();
        assert_eq!(
            texts,
            vec![
                "Running command \"removeaction\"".to_string(),
                "Removed action \"open\"".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn handler_error_is_reported() {
        let dispatcher = dispatcher();
        let transport = RecordingTransport::ready();
        transport.receive_message("addaction nonsense");

        dispatcher
            .tick(&as_transports(&[("t", Arc::clone(&transport))]), None)
            .await;

        assert_eq!(
            transport.sent()[1].0,
            "Command \"addaction\" failed: usage: addaction <phrase> = <action_key>"
        );
    }

    #[tokio::test]
    async fn exit_stops_the_loop_and_all_services() {
        let manager = Arc::new(ServiceManager::in_memory(HubConfig {
            supported_services: vec!["interface".to_string()],
            services: Default::default(),
            fallback: None,
        }));
        manager.load_services();
        assert!(manager.install(RecordingBackend {
            calls: Mutex::new(Vec::new()),
            reply: BackendReply::ok(None),
        }));
        manager.start_all().await;

        let interface = manager.get::<InterfaceTransport>().unwrap();
        interface.submit("lock the front door");
        interface.submit("exit");

        let dispatcher = dispatcher().with_config(DispatchConfig {
            idle_interval: Duration::from_millis(1),
        });
        tokio::time::timeout(Duration::from_secs(5), dispatcher.run(Arc::clone(&manager)))
            .await
            .expect("dispatcher did not stop")
            .unwrap();

        let replies: Vec<_> = interface
            .drain_replies()
            .into_iter()
            .map(|r| r.text)
            .collect();
        assert_eq!(
            replies,
            vec![
                "Received \"lock the front door\"".to_string(),
                "Running command \"exit\"".to_string(),
                "Shutting down.".to_string(),
            ]
        );
        let recorded = manager.get::<RecordingBackend>().unwrap();
        assert_eq!(recorded.calls.lock().len(), 1);
        assert!(manager.is_stopped());
        assert_eq!(
            manager.service_state("interface"),
            Some(ServiceState::Stopped)
        );
    }

    #[tokio::test]
    async fn panicking_loop_still_stops_services() {
        let manager = Arc::new(ServiceManager::in_memory(HubConfig {
            supported_services: vec!["interface".to_string()],
            services: Default::default(),
            fallback: None,
        }));
        manager.load_services();
        manager.start_all().await;

        let dispatcher = dispatcher();
        dispatcher.resolver.register_command("boom", Arc::new(Panics));
        manager.get::<InterfaceTransport>().unwrap().submit("boom");

        let result = tokio::time::timeout(Duration::from_secs(5), dispatcher.run(Arc::clone(&manager)))
            .await
            .expect("dispatcher did not stop");

        assert!(result.is_err());
        assert!(manager.is_stopped());
        assert_eq!(
            manager.service_state("interface"),
            Some(ServiceState::Stopped)
        );
    }
}
