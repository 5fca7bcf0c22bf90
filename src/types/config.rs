//! Configuration structures.
//!
//! Configuration comes from defaults, an optional JSON file and a handful of
//! environment overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::{Error, Result};

/// Global bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Namespace configuration.
    #[serde(default)]
    pub bus: BusConfig,

    /// Network connection configuration.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from a JSON file. Missing sections keep defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| {
            Error::validation(format!("invalid config {}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    /// Apply `CORABUS_*` environment overrides.
    pub fn apply_env(mut self) -> Self {
        if let Ok(machine) = std::env::var("CORABUS_MACHINE") {
            self.bus.machine = machine;
        }
        if let Ok(application) = std::env::var("CORABUS_APPLICATION") {
            self.bus.application = application;
        }
        if let Ok(addr) = std::env::var("CORABUS_LISTEN_ADDR") {
            self.network.listen_addr = addr;
        }
        self
    }
}

/// Namespace configuration: the root of every bus path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Machine segment of the root path.
    pub machine: String,

    /// Application segment of the root path.
    pub application: String,

    /// Prefix of auto-generated names given to detached nodes.
    pub offline_prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            machine: "localhost".to_string(),
            application: "corabus".to_string(),
            offline_prefix: "offline".to_string(),
        }
    }
}

/// Network connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server bind address (TCP).
    pub listen_addr: String,

    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,

    /// Deadline for the peer's hello frame.
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,

    /// Capacity of the outbound request queue.
    pub request_queue_capacity: usize,

    /// Capacity of the outbound response queue.
    pub response_queue_capacity: usize,

    /// Longest wait for room in an outbound queue before the connection is
    /// declared stale.
    #[serde(with = "humantime_serde")]
    pub max_queue_wait: Duration,

    /// Write timeout per frame.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Maximum concurrent inbound connections accepted by a server.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7411".to_string(),
            max_frame_bytes: 5 * 1024 * 1024,
            handshake_timeout: Duration::from_secs(5),
            request_queue_capacity: 128,
            response_queue_capacity: 128,
            max_queue_wait: Duration::from_secs(2),
            write_timeout: Duration::from_secs(10),
            max_connections: 256,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.response_queue_capacity, 128);
        assert_eq!(config.network.max_queue_wait, Duration::from_secs(2));
        assert_eq!(config.bus.offline_prefix, "offline");
    }

    #[test]
    fn test_from_file_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bus": {{"machine": "m1"}}, "network": {{"max_queue_wait": "500ms"}}}}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.bus.machine, "m1");
        assert_eq!(config.bus.application, "corabus");
        assert_eq!(config.network.max_queue_wait, Duration::from_millis(500));
        assert_eq!(config.network.request_queue_capacity, 128);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
