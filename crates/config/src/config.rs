use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::ConfigError;

fn default_checked() -> bool {
    true
}

fn default_http_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_ws_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_ws_port() -> u16 {
    8765
}

/// One entry under `devices:` in the YAML file.
///
/// `script` used to name a Python file to `importlib`-load at startup; here
/// it names a key in the adapter registry (see the adapters crate) instead.
/// Any keys an adapter needs beyond the common ones land in `extra` and are
/// handed to that adapter's `init` untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub attached_name: String,
    pub hostname: String,
    #[serde(default)]
    pub subname: Option<String>,
    #[serde(default)]
    pub attached_subname: Option<String>,
    pub script: String,
    #[serde(default = "default_checked")]
    pub checked: bool,
    /// Informational category (`camera`, `mocap_workstation`, ...). Unknown
    /// or absent values fall back to `Other` and never block loading.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_ws_addr")]
    pub ws_addr: String,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            http_port: default_http_port(),
            ws_addr: default_ws_addr(),
            ws_port: default_ws_port(),
        }
    }
}

/// The optional bridge that forwards commands to an upstream listen server.
/// Absent means the bridge is disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenServerConfig {
    pub module: String,
    pub entrypoint: String,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub listen_server: Option<ListenServerConfig>,
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigError::LoadFailed {
                path: path.clone(),
                source: Arc::new(e),
            })?;

        let config: Config = serde_yaml::from_str(&contents).map_err(|e| {
            let span_start = e.location().map(|loc| loc.index()).unwrap_or(0);
            let span_end = e
                .location()
                .map(|loc| loc.index() + 1)
                .unwrap_or_else(|| contents.len().max(1));
            ConfigError::InvalidFormat {
                path: path.clone(),
                details: e.to_string(),
                content: contents.clone(),
                span: (span_start..span_end).into(),
            }
        })?;

        config.validate()?;

        info!(device_count = config.devices.len(), "configuration loaded");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.attached_name.as_str()) {
                return Err(ConfigError::DuplicateDevice {
                    attached_name: device.attached_name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_config_keeps_unknown_keys_in_extra() {
        let yaml = r#"
attached_name: cam-01
hostname: cam-01.local
script: generic_ws
extra_key: 42
"#;
        let device: DeviceConfig = serde_yaml::from_str(yaml).expect("parses");
        assert!(device.checked);
        assert_eq!(device.extra.get("extra_key"), Some(&Value::from(42)));
    }

    #[test]
    fn server_config_defaults_when_absent() {
        let config: Config = serde_yaml::from_str("devices: []").expect("parses");
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.server.ws_port, 8765);
        assert!(config.listen_server.is_none());
    }
}
