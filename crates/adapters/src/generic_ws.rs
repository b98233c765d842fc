use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bus::CommandBus;
use futures_util::{SinkExt, StreamExt};
use miette::{IntoDiagnostic, Result};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use types::{
    Command, Device, TYPE_BROADCAST_GLOS, TYPE_FILE_NAME, TYPE_HEALTH, TYPE_RECORD_START,
    TYPE_RECORD_STOP, TYPE_SET_PATH,
};

use crate::error::AdapterError;
use crate::traits::DeviceAdapter;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(5);
const OVERALL_CAP: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Speaks a plain-text line protocol (`Start` / `Stop` / `SetName <value>` /
/// `SetPath <value>` / `health`) over a persistent per-device WebSocket
/// connection reused across calls rather than reconnecting per command.
pub struct GenericWsAdapter {
    connections: Mutex<HashMap<String, WsStream>>,
    bus: CommandBus,
}

impl GenericWsAdapter {
    pub fn new(bus: CommandBus) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            bus,
        }
    }

    fn build_payload(command: &Command) -> Option<String> {
        match command.kind.as_str() {
            TYPE_RECORD_START => Some("Start".to_string()),
            TYPE_RECORD_STOP => Some("Stop".to_string()),
            TYPE_FILE_NAME | TYPE_BROADCAST_GLOS => command
                .get_str("value")
                .map(|value| format!("SetName {value}")),
            TYPE_SET_PATH => command
                .get_str("value")
                .map(|value| format!("SetPath {value}")),
            TYPE_HEALTH => Some("health".to_string()),
            _ => None,
        }
    }

    async fn connect(device: &Device) -> Result<WsStream, AdapterError> {
        let endpoint = device.endpoint().ok_or_else(|| AdapterError::NoEndpoint {
            device: device.attached_name.clone(),
        })?;
        let url = format!("ws://{endpoint}");
        let (stream, _) = connect_async(&url)
            .await
            .map_err(|e| AdapterError::ConnectFailed {
                device: device.attached_name.clone(),
                endpoint,
                details: e.to_string(),
            })?;
        Ok(stream)
    }

    async fn connection_for<'a>(
        &self,
        guard: &'a mut HashMap<String, WsStream>,
        device: &Device,
    ) -> Result<&'a mut WsStream, AdapterError> {
        if !guard.contains_key(&device.attached_name) {
            let stream = Self::connect(device).await?;
            guard.insert(device.attached_name.clone(), stream);
        }
        Ok(guard.get_mut(&device.attached_name).expect("just inserted"))
    }

    /// Drains whatever the device sends back, forwarding any JSON object
    /// frame onto the bus as a targeted command so a device's spontaneous
    /// replies reach observers without requiring one. Non-JSON frames are
    /// discarded with a trace.
    async fn drain(bus: &CommandBus, device_name: &str, stream: &mut WsStream) {
        let deadline = tokio::time::Instant::now() + OVERALL_CAP;
        loop {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            match timeout(IDLE_TIMEOUT, stream.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    Self::forward_reply(bus, device_name, &text).await;
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "error draining adapter socket");
                    break;
                }
                Ok(None) | Err(_) => break,
            }
        }
    }

    /// Parses a reply frame as a JSON object and republishes it as a command
    /// targeted at `device_name`, re-stamping `device` the same way the
    /// dispatcher stamps outbound commands. A frame with no `type` field, or
    /// that isn't a JSON object at all, is dropped.
    async fn forward_reply(bus: &CommandBus, device_name: &str, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(mut map)) => {
                let Some(kind) = map.remove("type").and_then(|v| v.as_str().map(str::to_string))
                else {
                    debug!(device = device_name, "reply frame missing `type`, discarding");
                    return;
                };
                map.insert("device".to_string(), Value::String(device_name.to_string()));
                bus.publish_command(Command { kind, payload: map }).await;
            }
            _ => debug!(device = device_name, "non-JSON-object reply frame, discarding"),
        }
    }
}

#[async_trait]
impl DeviceAdapter for GenericWsAdapter {
    async fn handle(&self, device: &Device, command: &Command) -> Result<()> {
        let Some(payload) = Self::build_payload(command) else {
            debug!(device = %device.attached_name, kind = %command.kind, "no payload mapping, skipping");
            return Ok(());
        };

        let mut guard = self.connections.lock().await;
        let stream = match self.connection_for(&mut guard, device).await {
            Ok(stream) => stream,
            Err(e) => return Err(e).into_diagnostic(),
        };

        if let Err(e) = stream.send(Message::Text(payload)).await {
            guard.remove(&device.attached_name);
            return Err(AdapterError::SendFailed {
                device: device.attached_name.clone(),
                details: e.to_string(),
            })
            .into_diagnostic();
        }

        if command.kind == TYPE_HEALTH {
            let reply = timeout(HEALTH_TIMEOUT, stream.next()).await;
            return match reply {
                Ok(Some(Ok(Message::Text(text)))) if text.trim() == "Good" => Ok(()),
                Ok(Some(Ok(_))) | Ok(None) => Err(AdapterError::SendFailed {
                    device: device.attached_name.clone(),
                    details: "unexpected health reply".to_string(),
                })
                .into_diagnostic(),
                Ok(Some(Err(e))) => Err(AdapterError::SendFailed {
                    device: device.attached_name.clone(),
                    details: e.to_string(),
                })
                .into_diagnostic(),
                Err(_) => Err(AdapterError::Timeout {
                    device: device.attached_name.clone(),
                    timeout_ms: HEALTH_TIMEOUT.as_millis() as u64,
                })
                .into_diagnostic(),
            };
        }

        Self::drain(&self.bus, &device.attached_name, stream).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_start_maps_to_start() {
        let payload = GenericWsAdapter::build_payload(&Command::new(TYPE_RECORD_START));
        assert_eq!(payload.as_deref(), Some("Start"));
    }

    #[test]
    fn record_stop_maps_to_stop() {
        let payload = GenericWsAdapter::build_payload(&Command::new(TYPE_RECORD_STOP));
        assert_eq!(payload.as_deref(), Some("Stop"));
    }

    #[test]
    fn file_name_and_broadcast_glos_both_map_to_set_name() {
        let file_name =
            Command::new(TYPE_FILE_NAME).with("value", "take_01");
        let glos = Command::new(TYPE_BROADCAST_GLOS).with("value", "take_01");
        assert_eq!(
            GenericWsAdapter::build_payload(&file_name).as_deref(),
            Some("SetName take_01")
        );
        assert_eq!(
            GenericWsAdapter::build_payload(&glos).as_deref(),
            Some("SetName take_01")
        );
    }

    #[test]
    fn set_path_maps_to_set_path_value() {
        let cmd = Command::new(TYPE_SET_PATH).with("value", "/data/session1");
        assert_eq!(
            GenericWsAdapter::build_payload(&cmd).as_deref(),
            Some("SetPath /data/session1")
        );
    }

    #[test]
    fn health_maps_to_health() {
        let payload = GenericWsAdapter::build_payload(&Command::new(TYPE_HEALTH));
        assert_eq!(payload.as_deref(), Some("health"));
    }

    #[test]
    fn missing_value_field_yields_no_payload() {
        let payload = GenericWsAdapter::build_payload(&Command::new(TYPE_FILE_NAME));
        assert_eq!(payload, None);
    }

    #[test]
    fn unknown_command_type_is_a_no_op() {
        let payload = GenericWsAdapter::build_payload(&Command::new("some_unrecognized_type"));
        assert_eq!(payload, None);
    }
}
