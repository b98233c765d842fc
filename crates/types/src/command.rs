use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TYPE_RECORD_START: &str = "recordStart";
pub const TYPE_RECORD_STOP: &str = "recordStop";
pub const TYPE_FILE_NAME: &str = "fileName";
pub const TYPE_BROADCAST_GLOS: &str = "broadcastGlos";
pub const TYPE_SET_PATH: &str = "setPath";
pub const TYPE_HEALTH: &str = "health";
pub const TYPE_HEALTH_RESPONSE: &str = "health_response";
pub const TYPE_HEALTH_TIMEOUT: &str = "health_timeout";
pub const TYPE_DNS: &str = "dns";
pub const TYPE_DNS_SUB: &str = "dns_sub";
pub const TYPE_ZEROCONF: &str = "zeroconf";
pub const TYPE_ZEROCONF_REMOVED: &str = "zeroconf_removed";

/// Command types the dispatcher never forwards to adapters.
pub const DISCOVERY_INTERNAL_TYPES: &[&str] =
    &[TYPE_DNS, TYPE_DNS_SUB, TYPE_ZEROCONF, TYPE_ZEROCONF_REMOVED];

/// "Apply to all eligible devices" command types.
pub const BROADCAST_TYPES: &[&str] = &[
    TYPE_RECORD_START,
    TYPE_RECORD_STOP,
    TYPE_FILE_NAME,
    TYPE_BROADCAST_GLOS,
    TYPE_SET_PATH,
];

/// Types the last-value replay cache retains.
pub const REPLAY_TYPES: &[&str] = &[TYPE_FILE_NAME];

/// A command bus record: an open, dynamically-typed payload keyed by `type`.
///
/// The recognized types are the `TYPE_*` constants above; anything else
/// propagates untouched, so this is a map rather than a closed enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Command {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }

    pub fn get_u16(&self, key: &str) -> Option<u16> {
        self.payload
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u16::try_from(v).ok())
    }

    /// The targeted device name. Tolerates both the `device` and `value`
    /// aliases that `health_timeout` carries in the wild.
    pub fn target_device(&self) -> Option<&str> {
        self.get_str("device")
            .or_else(|| (self.kind == TYPE_HEALTH_TIMEOUT).then(|| self.get_str("value")).flatten())
    }

    pub fn is_discovery_internal(&self) -> bool {
        DISCOVERY_INTERNAL_TYPES.contains(&self.kind.as_str())
    }

    pub fn is_broadcast(&self) -> bool {
        BROADCAST_TYPES.contains(&self.kind.as_str())
    }

    /// A copy enriched with the target device's current `ip`/`port`/`sub_ip`,
    /// as the dispatcher attaches before handing a command to an adapter.
    #[must_use]
    pub fn enriched(&self, ip: Option<&str>, port: Option<u16>, sub_ip: Option<&str>) -> Self {
        let mut cmd = self.clone();
        if let Some(ip) = ip {
            cmd.payload
                .insert("ip".to_string(), Value::String(ip.to_string()));
        }
        if let Some(port) = port {
            cmd.payload.insert("port".to_string(), Value::from(port));
        }
        if let Some(sub_ip) = sub_ip {
            cmd.payload
                .insert("sub_ip".to_string(), Value::String(sub_ip.to_string()));
        }
        cmd
    }
}

/// A device presence transition observed by device subscribers:
/// `(attached_name, endpoint)` where `endpoint` is `"ip:port"`, a bare ip,
/// or `None`.
pub type DeviceEvent = (String, Option<String>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_timeout_target_falls_back_to_value_alias() {
        let cmd = Command::new(TYPE_HEALTH_TIMEOUT).with("value", "cam-01");
        assert_eq!(cmd.target_device(), Some("cam-01"));
    }

    #[test]
    fn device_field_takes_priority_over_value_alias() {
        let cmd = Command::new(TYPE_HEALTH_TIMEOUT)
            .with("device", "cam-01")
            .with("value", "ignored");
        assert_eq!(cmd.target_device(), Some("cam-01"));
    }

    #[test]
    fn enriched_copy_leaves_the_original_untouched() {
        let cmd = Command::new(TYPE_FILE_NAME).with("value", "take_01");
        let enriched = cmd.enriched(Some("10.0.0.5"), Some(5000), None);
        assert_eq!(cmd.get_str("ip"), None);
        assert_eq!(enriched.get_str("ip"), Some("10.0.0.5"));
        assert_eq!(enriched.get_u16("port"), Some(5000));
    }
}
