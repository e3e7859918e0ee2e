use std::any::{Any, TypeId};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use hahub_core::BackendConnector;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::config::{ConfigurationError, ServiceSettings};
use super::lifecycle::{Lifecycle, LifecycleError, ServiceState};
use crate::traits::MessageTransport;

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// Lifecycle-managed service. Every transport and backend connector implements this.
///
/// Services are configured before registration, started in registration
/// order, and stopped in reverse registration order. The `Any` bound enables
/// type-based lookup via `ServiceRegistry::get::<T>()`.
#[async_trait]
pub trait Service: Send + Sync + Any {
    /// Returns the unique registry name of this service (e.g. `"telegram"`).
    fn name(&self) -> &'static str;

    /// Whether `start` runs until `stop` and so needs its own task.
    fn threaded(&self) -> bool {
        false
    }

    /// Accept or reject the service's settings bag.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` naming the first missing or invalid field.
    fn configure(&mut self, settings: &ServiceSettings) -> Result<(), ConfigurationError>;

    /// Bring the service up. For threaded services this is the service's main
    /// loop and returns only after `stop`.
    async fn start(&self) -> anyhow::Result<()>;

    /// Ask the service to shut down. Must unblock a running `start`.
    async fn stop(&self) -> anyhow::Result<()>;

    /// The transport capability, if this service has one.
    fn as_transport(self: Arc<Self>) -> Option<Arc<dyn MessageTransport>> {
        None
    }

    /// The backend capability, if this service has one.
    fn as_backend(self: Arc<Self>) -> Option<Arc<dyn BackendConnector>> {
        None
    }
}

// ---------------------------------------------------------------------------
// ServiceEntry
// ---------------------------------------------------------------------------

/// A registered service with its lifecycle and, once started, its task.
pub struct ServiceEntry {
    service: Arc<dyn Service>,
    transport: Option<Arc<dyn MessageTransport>>,
    backend: Option<Arc<dyn BackendConnector>>,
    lifecycle: Lifecycle,
    unit: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceEntry {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.service.name()
    }

    #[must_use]
    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    #[must_use]
    pub fn transport(&self) -> Option<&Arc<dyn MessageTransport>> {
        self.transport.as_ref()
    }

    #[must_use]
    pub fn backend(&self) -> Option<&Arc<dyn BackendConnector>> {
        self.backend.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        self.lifecycle.state()
    }

    /// # Errors
    ///
    /// Returns an error if the transition is not legal from the current state.
    pub fn advance(&self, next: ServiceState) -> Result<ServiceState, LifecycleError> {
        self.lifecycle.advance(next)
    }

    pub fn set_unit(&self, handle: JoinHandle<()>) {
        *self.unit.lock() = Some(handle);
    }

    #[must_use]
    pub fn take_unit(&self) -> Option<JoinHandle<()>> {
        self.unit.lock().take()
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Registry for configured services.
///
/// Provides two lookup mechanisms:
/// - **By name** (`get_by_name`): uses the service's `name()` string
/// - **By type** (`get::<T>`): uses `TypeId` for compile-time dispatch
pub struct ServiceRegistry {
    by_name: DashMap<&'static str, Arc<ServiceEntry>>,
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    /// Registration order for deterministic start/stop sequencing.
    order: RwLock<Vec<&'static str>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_type: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Register an already-configured service in the `Configured` state.
    ///
    /// Returns `None` if a service with the same name is already registered.
    pub fn register<T: Service>(&self, service: T) -> Option<Arc<ServiceEntry>> {
        let name = service.name();
        if self.by_name.contains_key(name) {
            return None;
        }

        let arc = Arc::new(service);
        let lifecycle = Lifecycle::new();
        lifecycle.advance(ServiceState::Configured).ok()?;
        let entry = Arc::new(ServiceEntry {
            transport: Arc::clone(&arc).as_transport(),
            backend: Arc::clone(&arc).as_backend(),
            service: arc.clone(),
            lifecycle,
            unit: Mutex::new(None),
        });

        self.by_name.insert(name, Arc::clone(&entry));
        self.by_type.insert(TypeId::of::<T>(), arc);
        self.order.write().push(name);
        Some(entry)
    }

    /// Retrieve a service by its concrete type.
    #[must_use]
    pub fn get<T: Service>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    /// Retrieve a service entry by its name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.by_name.get(name).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Entries in registration order.
    #[must_use]
    pub fn entries(&self) -> Vec<Arc<ServiceEntry>> {
        let order = self.order.read().clone();
        order
            .iter()
            .filter_map(|name| self.get_by_name(name))
            .collect()
    }

    /// Service names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.order.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.read().is_empty()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
