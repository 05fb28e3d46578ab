//! Client configuration.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Configuration for the update client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Update server host name or address.
    pub server_host: String,
    /// Update server TCP port.
    pub server_port: u16,
    /// Tenant-scoped base path on the server.
    pub base_path: String,
    /// Device product name, the first half of the controller id.
    pub device_name: String,
    /// Device serial number, reported in hex.
    pub serial_number: u64,
    /// Poll interval in seconds until the server overrides it.
    pub poll_interval_secs: u32,
    /// Receive timeout per transport read, milliseconds.
    pub recv_timeout_ms: u64,
    /// Connect timeout, milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "localhost".into(),
            server_port: 8080,
            base_path: "/DEFAULT/controller/v1".into(),
            device_name: "device".into(),
            serial_number: 0,
            poll_interval_secs: 30,
            recv_timeout_ms: 3000,
            connect_timeout_ms: 5000,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `Host` header value for requests to the update server.
    pub fn host_header(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Controller id registered with the server: product name plus the
    /// serial number in hex.
    pub fn controller_id(&self) -> String {
        format!("{}-{:x}", self.device_name, self.serial_number)
    }

    /// Server path of this controller's base resource.
    pub fn controller_path(&self) -> String {
        format!("{}/{}", self.base_path, self.controller_id())
    }
}
