//! Configuration module for sensord-rs
//!
//! This module handles the server configuration:
//! - Socket paths for the command and event channels
//! - Event queue capacity and the stateful (last-event cached) event list
//! - Locations of the module and stream catalogs
//! - Optional file logging
//!
//! # File format
//!
//! The server configuration is a TOML document. Every section and field is
//! optional and falls back to the defaults below.
//!
//! ```toml
//! [server]
//! command_socket = "/tmp/sf_command_socket"
//! event_socket = "/tmp/sf_event_socket"
//! max_connections = 64
//!
//! [events]
//! queue_capacity = 1000
//! stateful_events = [0x10001]
//!
//! [catalog]
//! sensors = "/usr/etc/sf_sensor.toml"
//! processors = "/usr/etc/sf_processor.toml"
//! streams = "/usr/etc/sf_data_stream.toml"
//! ```

pub mod catalog;

pub use catalog::{Catalog, CatalogValue};

use crate::error::{Result, SensordError};
use crate::protocol::LARGEST_FIXED_PAYLOAD;
use crate::types::{events, EventType, HUB_DATA_MAX_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default command channel socket path
pub const COMMAND_CHANNEL_PATH: &str = "/tmp/sf_command_socket";

/// Default event channel socket path
pub const EVENT_CHANNEL_PATH: &str = "/tmp/sf_event_socket";

/// Default bound of the event queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default cap on concurrently served connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Largest accepted command payload (the sensor-hub blob plus its fixed fields)
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = HUB_DATA_MAX_SIZE + 8;

/// Socket and connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Path of the command channel socket
    pub command_socket: PathBuf,
    /// Path of the event channel socket
    pub event_socket: PathBuf,
    /// Maximum concurrently served connections per channel
    pub max_connections: usize,
    /// Largest payload accepted in a command packet
    pub max_payload_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            command_socket: PathBuf::from(COMMAND_CHANNEL_PATH),
            event_socket: PathBuf::from(EVENT_CHANNEL_PATH),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Event pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Bound of the event queue; events beyond it are dropped
    pub queue_capacity: usize,
    /// Event types whose latest occurrence is cached for late subscribers
    pub stateful_events: Vec<u32>,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stateful_events: vec![events::ACCEL_ROTATION_CHECK.0],
        }
    }
}

impl EventSettings {
    /// Stateful allow-list as typed event types
    pub fn stateful_event_types(&self) -> Vec<EventType> {
        self.stateful_events.iter().map(|&raw| EventType(raw)).collect()
    }
}

/// Locations of the catalogs read at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogPaths {
    /// Sensor plugin catalog
    pub sensors: Option<PathBuf>,
    /// Filter plugin catalog
    pub filters: Option<PathBuf>,
    /// Processor plugin catalog
    pub processors: Option<PathBuf>,
    /// Stream (pipeline) catalog
    pub streams: Option<PathBuf>,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Directory for daily-rotated log files; stdout only when unset
    pub directory: Option<PathBuf>,
    /// File name prefix for rotated log files
    pub file_prefix: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: "sensord.log".to_string(),
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub events: EventSettings,
    pub catalog: CatalogPaths,
    pub logging: LoggingSettings,
}

impl ServerConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| SensordError::Config(format!("Failed to parse server config: {}", e)))
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SensordError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, falling back to defaults when it is missing
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(p) => {
                tracing::warn!("Config file {} not found, using defaults", p.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.events.queue_capacity == 0 {
            return Err(SensordError::Config(
                "events.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(SensordError::Config(
                "server.max_connections must be greater than zero".to_string(),
            ));
        }
        if self.server.max_payload_size < LARGEST_FIXED_PAYLOAD {
            return Err(SensordError::Config(format!(
                "server.max_payload_size must be at least {} bytes",
                LARGEST_FIXED_PAYLOAD
            )));
        }
        if self.server.command_socket == self.server.event_socket {
            return Err(SensordError::Config(
                "command and event sockets must use different paths".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.command_socket, PathBuf::from(COMMAND_CHANNEL_PATH));
        assert_eq!(config.events.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(
            config.events.stateful_event_types(),
            vec![events::ACCEL_ROTATION_CHECK]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            [server]
            command_socket = "/run/sensord/cmd"

            [events]
            queue_capacity = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.server.command_socket, PathBuf::from("/run/sensord/cmd"));
        assert_eq!(config.server.event_socket, PathBuf::from(EVENT_CHANNEL_PATH));
        assert_eq!(config.events.queue_capacity, 16);
        assert_eq!(config.server.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = ServerConfig::default();
        config.events.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_small_payload_limit() {
        let mut config = ServerConfig::default();
        config.server.max_payload_size = 0;
        assert!(matches!(config.validate(), Err(SensordError::Config(_))));
        config.server.max_payload_size = LARGEST_FIXED_PAYLOAD - 1;
        assert!(config.validate().is_err());
        config.server.max_payload_size = LARGEST_FIXED_PAYLOAD;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ServerConfig::load(dir.path().join("nope.toml")).is_err());
        let config = ServerConfig::load_or_default(Some(dir.path().join("nope.toml").as_path())).unwrap();
        assert_eq!(config.events.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensord.toml");
        std::fs::write(&path, "[catalog]\nstreams = \"/etc/streams.toml\"\n").unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.catalog.streams, Some(PathBuf::from("/etc/streams.toml")));
    }
}
