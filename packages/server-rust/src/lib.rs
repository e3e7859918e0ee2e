//! `hahub` server: service lifecycle, message transports, the Home Assistant
//! connector, and the dispatch loop.

pub mod backend;
pub mod commands;
pub mod dispatch;
pub mod fallback;
pub mod logging;
pub mod service;
pub mod traits;
pub mod transport;

pub use dispatch::{DispatchConfig, Dispatcher};
pub use service::{Service, ServiceManager};
pub use traits::MessageTransport;
