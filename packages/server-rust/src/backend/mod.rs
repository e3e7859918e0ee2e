//! Automation backend connectors.

pub mod home_assistant;

pub use home_assistant::HomeAssistantConnector;
