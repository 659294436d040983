//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: converts between these structs and TOML, JSON and environment values
//! - **Option<T>**: a setting that may be absent (`upload.max_bytes` unset means unbounded)
//! - **enum with `rename_all`**: the storage backend is spelled `"filesystem"` / `"memory"`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (APP_SERVER__HOST, APP_STREAM__ACK_TIMEOUT_MS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::ingest::MAX_RELAY_CHUNK_SIZE;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// Settings are grouped by the part of the service that reads them, so each
/// component only needs to look at its own section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub upload: UploadConfig,
    pub relay: RelayConfig,
    pub storage: StorageConfig,
}

/// Where the HTTP server listens.
///
/// - `host = "127.0.0.1"`: only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: accept connections from any address (recording devices on the LAN)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Streaming connection (`/ws/audio`) tuning.
///
/// ## Fields:
/// - `ack_timeout_ms`: how long an acknowledgment may wait for queue space before it is dropped
/// - `ack_queue_capacity`: acknowledgments buffered between the receive loop and the socket
/// - `frame_queue_capacity`: inbound chunks buffered before the socket stops reading
/// - `ping_interval_secs`: keep-alive ping period; idle connections are never closed
/// - `max_frame_bytes`: largest single WebSocket frame accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub ack_timeout_ms: u64,
    pub ack_queue_capacity: usize,
    pub frame_queue_capacity: usize,
    pub ping_interval_secs: u64,
    pub max_frame_bytes: usize,
}

impl StreamConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted upload body. `None` accepts any size.
    pub max_bytes: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Default window size for relayed streams, overridable per request.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Filesystem,
    Memory,
}

/// Which sink persists received audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory used by the filesystem backend.
    pub root: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            stream: StreamConfig {
                ack_timeout_ms: 1000,
                ack_queue_capacity: 32,
                frame_queue_capacity: 64,
                ping_interval_secs: 30,
                max_frame_bytes: 1024 * 1024,
            },
            upload: UploadConfig { max_bytes: None },
            relay: RelayConfig { chunk_size: 64 * 1024 },
            storage: StorageConfig {
                backend: StorageBackend::Filesystem,
                root: "./recordings".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: override server host
    /// - `APP_STREAM__ACK_TIMEOUT_MS=250`: override the ack timeout
    /// - `APP_STORAGE__BACKEND=memory`: keep everything in memory
    /// - `HOST=0.0.0.0` / `PORT=3000`: special cases for deployment platforms
    ///
    /// Nested keys are separated by a double underscore because single
    /// underscores appear inside field names.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.stream.ack_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Acknowledgment timeout must be greater than 0"));
        }

        if self.stream.ack_queue_capacity == 0 || self.stream.frame_queue_capacity == 0 {
            return Err(anyhow::anyhow!("Stream queue capacities must be greater than 0"));
        }

        if self.stream.ping_interval_secs == 0 {
            return Err(anyhow::anyhow!("Ping interval must be greater than 0"));
        }

        if self.stream.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("Max frame size must be greater than 0"));
        }

        if self.relay.chunk_size == 0 || self.relay.chunk_size > MAX_RELAY_CHUNK_SIZE {
            return Err(anyhow::anyhow!(
                "Relay chunk size must be between 1 and {} bytes",
                MAX_RELAY_CHUNK_SIZE
            ));
        }

        if self.storage.root.trim().is_empty() {
            return Err(anyhow::anyhow!("Storage root cannot be empty"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// Only the fields present in the JSON change; `{"relay": {"chunk_size": 4096}}`
    /// leaves everything else alone. `{"upload": {"max_bytes": null}}` removes the
    /// upload cap. The storage section is fixed at startup and ignored here.
    ///
    /// The update is applied to a copy and only committed once it validates.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;
        let mut updated = self.clone();

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                updated.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                updated.server.port = u16::try_from(port)
                    .map_err(|_| anyhow::anyhow!("Server port out of range: {}", port))?;
            }
        }

        if let Some(stream) = partial_config.get("stream") {
            if let Some(timeout) = stream.get("ack_timeout_ms").and_then(|v| v.as_u64()) {
                updated.stream.ack_timeout_ms = timeout;
            }
            if let Some(capacity) = stream.get("ack_queue_capacity").and_then(|v| v.as_u64()) {
                updated.stream.ack_queue_capacity = capacity as usize;
            }
            if let Some(capacity) = stream.get("frame_queue_capacity").and_then(|v| v.as_u64()) {
                updated.stream.frame_queue_capacity = capacity as usize;
            }
            if let Some(interval) = stream.get("ping_interval_secs").and_then(|v| v.as_u64()) {
                updated.stream.ping_interval_secs = interval;
            }
            if let Some(max) = stream.get("max_frame_bytes").and_then(|v| v.as_u64()) {
                updated.stream.max_frame_bytes = max as usize;
            }
        }

        if let Some(upload) = partial_config.get("upload") {
            match upload.get("max_bytes") {
                Some(serde_json::Value::Null) => updated.upload.max_bytes = None,
                Some(value) => {
                    let max = value
                        .as_u64()
                        .ok_or_else(|| anyhow::anyhow!("upload.max_bytes must be a non-negative integer or null"))?;
                    updated.upload.max_bytes = Some(max as usize);
                }
                None => {}
            }
        }

        if let Some(relay) = partial_config.get("relay") {
            if let Some(size) = relay.get("chunk_size").and_then(|v| v.as_u64()) {
                updated.relay.chunk_size = size as usize;
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.relay.chunk_size, 65536);
        assert_eq!(config.stream.ack_timeout(), Duration::from_secs(1));
        assert!(config.upload.max_bytes.is_none());
        assert_eq!(config.storage.backend, StorageBackend::Filesystem);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stream.ack_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.relay.chunk_size = MAX_RELAY_CHUNK_SIZE + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.root = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"relay": {"chunk_size": 4096}, "stream": {"ack_timeout_ms": 250}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.relay.chunk_size, 4096);
        assert_eq!(config.stream.ack_timeout_ms, 250);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_upload_cap_can_be_set_and_cleared() {
        let mut config = AppConfig::default();
        config.update_from_json(r#"{"upload": {"max_bytes": 1024}}"#).unwrap();
        assert_eq!(config.upload.max_bytes, Some(1024));

        config.update_from_json(r#"{"upload": {"max_bytes": null}}"#).unwrap();
        assert_eq!(config.upload.max_bytes, None);

        assert!(config.update_from_json(r#"{"upload": {"max_bytes": "big"}}"#).is_err());
    }

    #[test]
    fn test_rejected_update_leaves_config_unchanged() {
        let mut config = AppConfig::default();
        let json = r#"{"relay": {"chunk_size": 0}, "stream": {"ack_timeout_ms": 5}}"#;
        assert!(config.update_from_json(json).is_err());
        assert_eq!(config.relay.chunk_size, 65536);
        assert_eq!(config.stream.ack_timeout_ms, 1000);

        assert!(config.update_from_json(r#"{"server": {"port": 70000}}"#).is_err());
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_storage_backend_names() {
        let json = serde_json::to_string(&StorageBackend::Memory).unwrap();
        assert_eq!(json, r#""memory""#);
        let parsed: StorageBackend = serde_json::from_str(r#""filesystem""#).unwrap();
        assert_eq!(parsed, StorageBackend::Filesystem);
    }
}
