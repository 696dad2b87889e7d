//! Server settings, read from the `server` section of the config store.

use hearth_protocol::Config;
use hearth_transport::TransportConfig;
use serde::Deserialize;

use crate::error::ServerError;

/// Process-level server settings.
///
/// ```toml
/// [server]
/// host = "0.0.0.0"
/// port = 8080
/// enable_udp = true
/// udp_port = 8081
/// workers = 4
/// task_workers = 1
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// HTTP/WebSocket port (0 for OS-assigned)
    pub port: u16,
    /// Path that accepts WebSocket upgrades
    pub ws_path: String,
    /// Bind the UDP endpoint on `udp_port`
    pub enable_udp: bool,
    pub udp_port: u16,
    /// Request workers; ordinals `0..workers`
    pub workers: usize,
    /// Background workers; ordinals `workers..workers + task_workers`
    pub task_workers: usize,
    /// Maximum concurrent WebSocket connections per worker
    pub max_connections: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            ws_path: "/ws".into(),
            enable_udp: false,
            udp_port: 8081,
            workers: 1,
            task_workers: 0,
            max_connections: Some(1024),
        }
    }
}

impl ServerConfig {
    /// Read the `server` section; absent keys keep their defaults.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        Ok(config.deserialize_section("server")?)
    }

    pub fn total_workers(&self) -> usize {
        self.workers + self.task_workers
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.workers == 0 {
            return Err(ServerError::InvalidConfig(
                "at least one request worker is required".into(),
            ));
        }
        if !self.ws_path.starts_with('/') {
            return Err(ServerError::InvalidConfig(format!(
                "ws_path must start with '/': {}",
                self.ws_path
            )));
        }
        Ok(())
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            hostname: self.host.clone(),
            port: self.port,
            ws_path: self.ws_path.clone(),
            udp_port: self.enable_udp.then_some(self.udp_port),
            max_connections: self.max_connections,
        }
    }
}
