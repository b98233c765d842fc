mod config;
mod error;

pub use config::{Config, DeviceConfig, ListenServerConfig, ServerConfig};
pub use error::ConfigError;
