//! Service lifecycle and management.
//!
//! 1. **Lifecycle** (`lifecycle`): per-service state machine
//! 2. **Registry** (`registry`): the `Service` trait and name/type lookup
//! 3. **Config** (`config`): the config document, its store, and typed settings access
//! 4. **Kinds** (`kind`): the closed set of constructible services
//! 5. **Manager** (`manager`): config-driven construction and bulk start/stop

pub mod config;
pub mod kind;
pub mod lifecycle;
pub mod manager;
pub mod registry;

// Re-export key types for convenient access.
pub use config::{
    ConfigError, ConfigStore, ConfigurationError, FallbackConfig, HubConfig, ServiceSettings,
};
pub use kind::ServiceKind;
pub use lifecycle::{Lifecycle, LifecycleError, ServiceState};
pub use manager::ServiceManager;
pub use registry::{Service, ServiceEntry, ServiceRegistry};
