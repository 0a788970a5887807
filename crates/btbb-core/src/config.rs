//! Tracker configuration.
//!
//! Settings are plain serde types so they can be stored anywhere a
//! [`ConfigStorage`] implementation can reach. On Linux the binary uses
//! [`FileConfigStorage`], a JSON file (`~/.btbb/settings.json` by default).
//! Every field is optional; unset fields fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::registry::RegistryConfig;

/// Default server name announced in the hello message.
pub const DEFAULT_NAME: &str = "btbb-tracker";

/// Default WebSocket bind address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:2501";

/// Default delta broadcast interval.
pub const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 1000;

/// Default per-subscriber outbound queue depth.
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 1024;

/// Errors that can occur during configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// The requested configuration was not found.
    NotFound(String),
    /// Failed to read configuration.
    ReadError(String),
    /// Failed to write configuration.
    WriteError(String),
    /// Configuration data is invalid.
    InvalidData(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "Configuration not found: {}", key),
            ConfigError::ReadError(msg) => write!(f, "Read error: {}", msg),
            ConfigError::WriteError(msg) => write!(f, "Write error: {}", msg),
            ConfigError::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Abstract settings storage.
pub trait ConfigStorage: Send + Sync {
    /// Load tracker settings.
    fn load_settings(&self) -> Result<TrackerSettings, ConfigError>;

    /// Save tracker settings.
    fn save_settings(&self, settings: &TrackerSettings) -> Result<(), ConfigError>;

    /// Load settings, treating missing configuration as all defaults.
    fn load_or_default(&self) -> Result<TrackerSettings, ConfigError> {
        match self.load_settings() {
            Err(ConfigError::NotFound(_)) => Ok(TrackerSettings::default()),
            other => other,
        }
    }
}

/// Tracker settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSettings {
    /// Server name sent in the hello message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// WebSocket listen address, e.g. "0.0.0.0:2501".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,

    /// Delta broadcast interval in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_interval_ms: Option<u64>,

    /// Cap on single-sighting records. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisional_capacity: Option<usize>,

    /// Outbound message queue depth per subscriber.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_queue: Option<usize>,
}

impl TrackerSettings {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    pub fn bind_addr(&self) -> &str {
        self.bind_addr.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    }

    /// Broadcast interval; a zero setting is raised to one millisecond.
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(
            self.publish_interval_ms
                .unwrap_or(DEFAULT_PUBLISH_INTERVAL_MS)
                .max(1),
        )
    }

    pub fn subscriber_queue(&self) -> usize {
        self.subscriber_queue
            .unwrap_or(DEFAULT_SUBSCRIBER_QUEUE)
            .max(1)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            provisional_capacity: self.provisional_capacity,
        }
    }
}

/// JSON file settings storage.
#[derive(Debug, Clone)]
pub struct FileConfigStorage {
    path: PathBuf,
}

impl FileConfigStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStorage for FileConfigStorage {
    fn load_settings(&self) -> Result<TrackerSettings, ConfigError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(self.path.display().to_string()))
            }
            Err(e) => return Err(ConfigError::ReadError(e.to_string())),
        };
        serde_json::from_str(&text).map_err(|e| ConfigError::InvalidData(e.to_string()))
    }

    fn save_settings(&self, settings: &TrackerSettings) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| ConfigError::WriteError(e.to_string()))
    }
}
