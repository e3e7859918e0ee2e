//! Service manager: builds services from the config document, owns them in a
//! [`ServiceRegistry`], and drives their lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hahub_core::BackendConnector;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::config::{ConfigError, ConfigStore, HubConfig};
use super::kind::ServiceKind;
use super::lifecycle::ServiceState;
use super::registry::{Service, ServiceRegistry};
use crate::backend::HomeAssistantConnector;
use crate::traits::MessageTransport;
use crate::transport::{ConsoleTransport, DiscordTransport, InterfaceTransport, TelegramTransport};

pub struct ServiceManager {
    config: RwLock<HubConfig>,
    store: Option<ConfigStore>,
    registry: ServiceRegistry,
    stopped: AtomicBool,
}

impl ServiceManager {
    /// Manager persisting its config through `store`. Starts from the default
    /// document until `load_config` is called.
    #[must_use]
    pub fn new(store: ConfigStore) -> Self {
        Self {
            config: RwLock::new(HubConfig::default()),
            store: Some(store),
            registry: ServiceRegistry::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Manager over an in-memory document. `save_config` is a no-op.
    #[must_use]
    pub fn in_memory(config: HubConfig) -> Self {
        Self {
            config: RwLock::new(config),
            store: None,
            registry: ServiceRegistry::new(),
            stopped: AtomicBool::new(false),
        }
    }

    // -----------------------------------------------------------------------
    // Config
    // -----------------------------------------------------------------------

    /// Load the document from the store, substituting and persisting the
    /// default when the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_config(&self) -> Result<(), ConfigError> {
        if let Some(store) = &self.store {
            let config = store.load_or_default()?;
            info!(path = %store.path().display(), "loaded config");
            *self.config.write() = config;
        }
        Ok(())
    }

    /// Persist the current document.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot write the file.
    pub fn save_config(&self) -> Result<(), ConfigError> {
        match &self.store {
            Some(store) => store.save(&self.config.read()),
            None => {
                debug!("in-memory config, nothing to save");
                Ok(())
            }
        }
    }

    /// Snapshot of the current document.
    #[must_use]
    pub fn config(&self) -> HubConfig {
        self.config.read().clone()
    }

    /// Set one key in a service's settings bag. Call `save_config` to persist.
    pub fn set_service_setting(&self, service: &str, key: &str, value: Value) {
        self.config.write().set(service, key, value);
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Construct and configure every service named in `supported_services`.
    /// Returns how many were registered.
    pub fn load_services(&self) -> usize {
        let names = self.config.read().supported_services.clone();
        for name in &names {
            self.load_service(name);
        }

        let loaded = self.registry.names();
        if loaded.is_empty() {
            warn!("no services loaded; check the supported_services and services config entries");
        } else {
            info!(count = loaded.len(), services = %loaded.join(", "), "loaded services");
        }
        loaded.len()
    }

    /// Construct, configure, and register one service by config name.
    ///
    /// Unknown names and rejected settings are logged and the service is
    /// excluded.
    pub fn load_service(&self, name: &str) -> bool {
        let kind: ServiceKind = match name.parse() {
            Ok(kind) => kind,
            Err(err) => {
                warn!(error = %err, "skipping service");
                return false;
            }
        };
        match kind {
            ServiceKind::HomeAssistant => self.install(HomeAssistantConnector::new()),
            ServiceKind::CommandLine => self.install(ConsoleTransport::new()),
            ServiceKind::Interface => self.install(InterfaceTransport::new()),
            ServiceKind::Discord => self.install(DiscordTransport::new()),
            ServiceKind::Telegram => self.install(TelegramTransport::new()),
        }
    }

    /// Configure `service` with its settings bag (an empty bag is inserted if
    /// none exists) and register it.
    pub fn install<S: Service>(&self, mut service: S) -> bool {
        let name = service.name();
        if self.registry.contains(name) {
            warn!(service = name, "service already loaded");
            return false;
        }

        let settings = self.config.write().settings_mut(name).clone();
        if let Err(err) = service.configure(&settings) {
            warn!(service = name, error = %err, "failed to configure service");
            return false;
        }

        if self.registry.register(service).is_none() {
            warn!(service = name, "service already loaded");
            return false;
        }
        debug!(service = name, "service configured");
        true
    }

    /// Load the console transport if no transport is registered.
    pub fn ensure_transport(&self) -> bool {
        if !self.message_transports().is_empty() {
            return false;
        }
        info!("no message transports configured, falling back to the console");
        self.load_service(ServiceKind::CommandLine.name())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start every registered service in registration order.
    ///
    /// Threaded services get their own task; the rest are awaited inline.
    /// Failures are logged and do not affect other services.
    pub async fn start_all(&self) {
        for entry in self.registry.entries() {
            let name = entry.name();
            if let Err(err) = entry.advance(ServiceState::Running) {
                warn!(service = name, error = %err, "not starting service");
                continue;
            }

            if entry.service().threaded() {
                let service = Arc::clone(entry.service());
                entry.set_unit(tokio::spawn(async move {
                    if let Err(err) = service.start().await {
                        error!(service = name, error = %err, "service exited with error");
                    }
                }));
                info!(service = name, "service started on its own task");
            } else if let Err(err) = entry.service().start().await {
                error!(service = name, error = %err, "service failed to start");
            } else {
                info!(service = name, "service started");
            }
        }
    }

    /// Stop every service in reverse registration order and wait for threaded
    /// services' tasks to finish. Only the first call has any effect.
    pub async fn stop_all(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!("services already stopped");
            return;
        }

        for entry in self.registry.entries().into_iter().rev() {
            let name = entry.name();
            if entry.state() == ServiceState::Stopped {
                continue;
            }
            info!(service = name, "stopping service");
            if let Err(err) = entry.service().stop().await {
                warn!(service = name, error = %err, "service stop reported an error");
            }
            if let Some(unit) = entry.take_unit() {
                if let Err(err) = unit.await {
                    error!(service = name, error = %err, "service task panicked");
                }
            }
            if let Err(err) = entry.advance(ServiceState::Stopped) {
                warn!(service = name, error = %err, "unexpected lifecycle state at stop");
            }
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Registered transports, in registration order, with their service names.
    #[must_use]
    pub fn message_transports(&self) -> Vec<(&'static str, Arc<dyn MessageTransport>)> {
        self.registry
            .entries()
            .iter()
            .filter_map(|entry| entry.transport().map(|t| (entry.name(), Arc::clone(t))))
            .collect()
    }

    /// The first registered service with the backend capability.
    #[must_use]
    pub fn backend(&self) -> Option<Arc<dyn BackendConnector>> {
        self.registry
            .entries()
            .iter()
            .find_map(|entry| entry.backend().cloned())
    }

    /// Retrieve a service by its concrete type.
    #[must_use]
    pub fn get<T: Service>(&self) -> Option<Arc<T>> {
        self.registry.get::<T>()
    }

    /// Lifecycle state of a registered service.
    #[must_use]
    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.registry.get_by_name(name).map(|entry| entry.state())
    }

    /// Registered service names, in registration order.
    #[must_use]
    pub fn service_names(&self) -> Vec<&'static str> {
        self.registry.names()
    }
}
