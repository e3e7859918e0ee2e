//! Hub configuration document and its on-disk store.
//!
//! The document has two required keys, `supported_services` (which services
//! to construct, in order) and `services` (one opaque settings bag per
//! service), plus an optional `fallback` section.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Opaque per-service settings bag.
pub type ServiceSettings = serde_json::Map<String, Value>;

/// Directory under `$HOME` holding the config file.
pub const CONFIG_DIR_NAME: &str = "HomeAssistantHub";
/// Config file name inside [`CONFIG_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "service_manager.json";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A service rejected its settings bag. The service is excluded, not fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no {field} provided")]
    Missing { field: &'static str },
    #[error("invalid {field} provided: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// The config document itself could not be produced. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("cannot locate a config path: HOME is not set")]
    NoHome,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Settings for the HTTP fallback resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Chat-completions endpoint, e.g. `http://localhost:11434/v1/chat/completions`.
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_fallback_model")]
    pub model: String,
    #[serde(default = "default_fallback_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_fallback_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_fallback_timeout_secs() -> u64 {
    10
}

/// The hub configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Service names to construct, in registration order.
    pub supported_services: Vec<String>,
    /// Service name -> settings bag.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackConfig>,
}

impl Default for HubConfig {
    fn default() -> Self {
        let mut services = BTreeMap::new();
        services.insert(
            "home_assistant".to_string(),
            bag(&[("url", ""), ("api_key", "")]),
        );
        services.insert("discord".to_string(), bag(&[("api_key", "")]));
        services.insert("telegram".to_string(), bag(&[("api_key", "")]));
        Self {
            supported_services: vec![
                "home_assistant".to_string(),
                "discord".to_string(),
                "telegram".to_string(),
            ],
            services,
            fallback: None,
        }
    }
}

impl HubConfig {
    /// Settings bag for `service`, inserting an empty one if absent.
    pub fn settings_mut(&mut self, service: &str) -> &mut ServiceSettings {
        self.services.entry(service.to_string()).or_default()
    }

    /// Set one key in a service's bag, creating the bag if needed.
    pub fn set(&mut self, service: &str, key: &str, value: Value) {
        self.settings_mut(service).insert(key.to_string(), value);
    }
}

fn bag(pairs: &[(&str, &str)]) -> ServiceSettings {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
        .collect()
}

// ---------------------------------------------------------------------------
// Typed access to a settings bag
// ---------------------------------------------------------------------------

/// A non-empty string setting.
///
/// # Errors
///
/// `Missing` when the key is absent or null, `Invalid` when it is empty or not
/// a string.
pub fn required_str(
    settings: &ServiceSettings,
    field: &'static str,
) -> Result<String, ConfigurationError> {
    match settings.get(field) {
        None | Some(Value::Null) => Err(ConfigurationError::Missing { field }),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ConfigurationError::Invalid {
            field,
            reason: "value is empty".to_string(),
        }),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(ConfigurationError::Invalid {
            field,
            reason: format!("expected a string, found {other}"),
        }),
    }
}

/// An optional string setting. Empty strings count as absent.
///
/// # Errors
///
/// `Invalid` when present but not a string.
pub fn optional_str(
    settings: &ServiceSettings,
    field: &'static str,
) -> Result<Option<String>, ConfigurationError> {
    match settings.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => Err(ConfigurationError::Invalid {
            field,
            reason: format!("expected a string, found {other}"),
        }),
    }
}

/// An optional non-negative integer setting. Numeric strings are accepted.
///
/// # Errors
///
/// `Invalid` when present but not a non-negative integer.
pub fn optional_u64(
    settings: &ServiceSettings,
    field: &'static str,
) -> Result<Option<u64>, ConfigurationError> {
    let invalid = |found: &Value| ConfigurationError::Invalid {
        field,
        reason: format!("expected a non-negative integer, found {found}"),
    };
    match settings.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| invalid(v)),
        Some(v @ Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid(v)),
        Some(other) => Err(invalid(other)),
    }
}

// ---------------------------------------------------------------------------
// ConfigStore
// ---------------------------------------------------------------------------

/// Reads and writes the config document at a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/HomeAssistantHub/service_manager.json`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoHome` if `HOME` is unset or empty.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = std::env::var_os("HOME")
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::NoHome)?;
        Ok(PathBuf::from(home)
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, or substitute the default and try to persist it.
    ///
    /// A default that cannot be written is still returned; the failure is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(&self) -> Result<HubConfig, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            }),
            // Covers a missing file and a parent component that is not a directory.
            Err(_) if !self.path.exists() => {
                let config = HubConfig::default();
                match self.save(&config) {
                    Ok(()) => info!(path = %self.path.display(), "wrote default config"),
                    Err(err) => warn!(error = %err, "using default config without persisting it"),
                }
                Ok(config)
            }
            Err(source) => Err(ConfigError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Write the document, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails.
    pub fn save(&self, config: &HubConfig) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let text = serde_json::to_string_pretty(config).map_err(ConfigError::Serialize)?;
        std::fs::write(&self.path, text).map_err(write_err)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn settings(value: Value) -> ServiceSettings {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn default_document_shape() {
        let value = serde_json::to_value(HubConfig::default()).unwrap();
        assert_eq!(
            value,
            json!({
                "supported_services": ["home_assistant", "discord", "telegram"],
                "services": {
                    "home_assistant": {"url": "", "api_key": ""},
                    "discord": {"api_key": ""},
                    "telegram": {"api_key": ""}
                }
            })
        );
    }

    #[test]
    fn missing_file_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let store = ConfigStore::new(&path);

        let config = store.load_or_default().unwrap();
        assert_eq!(config, HubConfig::default());
        assert!(path.exists());

        // A second load reads what was written.
        assert_eq!(store.load_or_default().unwrap(), HubConfig::default());
    }

    #[test]
    fn unparsable_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        let err = ConfigStore::new(&path).load_or_default().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn unwritable_default_is_used_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let store = ConfigStore::new(blocker.join(CONFIG_FILE_NAME));

        let config = store.load_or_default().unwrap();
        assert_eq!(config, HubConfig::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn unreadable_existing_path_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be exists but cannot be read as text.
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::create_dir(&path).unwrap();

        let err = ConfigStore::new(&path).load_or_default().unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn save_round_trips_settings_and_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join(CONFIG_FILE_NAME));

        let mut config = HubConfig::default();
        config.set("home_assistant", "url", json!("http://ha.local:8123"));
        config.set("command_line", "echo", json!(true));
        config.fallback = Some(FallbackConfig {
            url: "http://localhost:11434/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "llama3".to_string(),
            timeout_secs: 5,
        });
        store.save(&config).unwrap();

        assert_eq!(store.load_or_default().unwrap(), config);
    }

    #[test]
    fn fallback_defaults_fill_missing_fields() {
        let config: HubConfig = serde_json::from_value(json!({
            "supported_services": [],
            "fallback": {"url": "http://x"}
        }))
        .unwrap();
        let fallback = config.fallback.unwrap();
        assert_eq!(fallback.model, "gpt-4o-mini");
        assert_eq!(fallback.timeout_secs, 10);
        assert!(config.services.is_empty());
    }

    #[test]
    fn settings_mut_inserts_empty_bag() {
        let mut config = HubConfig::default();
        assert!(config.settings_mut("interface").is_empty());
        assert!(config.services.contains_key("interface"));
    }

    #[test]
    fn required_str_rejects_missing_and_empty() {
        let bag = settings(json!({"url": "", "api_key": "  token ", "port": 8123}));
        assert_eq!(
            required_str(&bag, "missing"),
            Err(ConfigurationError::Missing { field: "missing" })
        );
        assert!(matches!(
            required_str(&bag, "url"),
            Err(ConfigurationError::Invalid { field: "url", .. })
        ));
        assert!(matches!(
            required_str(&bag, "port"),
            Err(ConfigurationError::Invalid { field: "port", .. })
        ));
        assert_eq!(required_str(&bag, "api_key").unwrap(), "token");
    }

    #[test]
    fn optional_settings() {
        let bag = settings(json!({
            "api_base": "",
            "poll_interval_ms": "250",
            "timeout_secs": 7,
            "bad": -1
        }));
        assert_eq!(optional_str(&bag, "api_base"), Ok(None));
        assert_eq!(optional_u64(&bag, "poll_interval_ms"), Ok(Some(250)));
        assert_eq!(optional_u64(&bag, "timeout_secs"), Ok(Some(7)));
        assert_eq!(optional_u64(&bag, "absent"), Ok(None));
        assert!(optional_u64(&bag, "bad").is_err());
    }

    #[test]
    fn configuration_error_messages() {
        assert_eq!(
            ConfigurationError::Missing { field: "api_key" }.to_string(),
            "no api_key provided"
        );
        assert_eq!(
            ConfigurationError::Invalid {
                field: "url",
                reason: "value is empty".to_string()
            }
            .to_string(),
            "invalid url provided: value is empty"
        );
    }
}
