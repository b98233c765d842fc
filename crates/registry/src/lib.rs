use std::sync::Arc;

use async_trait::async_trait;
use bus::CommandBus;
use config::DeviceConfig;
use miette::Result;
use tracing::{debug, info, warn};
use types::{
    DeviceKind, Service, ServiceHandle, TYPE_DNS, TYPE_DNS_SUB, TYPE_ZEROCONF,
    TYPE_ZEROCONF_REMOVED,
};

mod registry;
pub use registry::DeviceRegistry;

fn parse_kind(kind: Option<&str>) -> DeviceKind {
    match kind.map(str::to_lowercase).as_deref() {
        Some("camera") => DeviceKind::Camera,
        Some("mocap_workstation") => DeviceKind::MocapWorkstation,
        Some("face_capture_phone") => DeviceKind::FaceCapturePhone,
        Some("video_recorder") => DeviceKind::VideoRecorder,
        _ => DeviceKind::Other,
    }
}

/// Owns the device table and keeps it in sync with discovery-internal
/// commands (`dns`, `dns_sub`, `zeroconf`, `zeroconf_removed`) flowing over
/// the command bus, publishing a `DeviceEvent` whenever a device's endpoint
/// transitions.
pub struct RegistryService {
    bus: CommandBus,
    registry: Arc<DeviceRegistry>,
    handle: ServiceHandle,
}

impl RegistryService {
    pub fn new(bus: CommandBus) -> Self {
        Self {
            bus,
            registry: Arc::new(DeviceRegistry::new()),
            handle: ServiceHandle::new(),
        }
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    pub async fn load_devices(&self, devices: &[DeviceConfig]) {
        for device in devices {
            self.registry
                .register(
                    device.attached_name.clone(),
                    device.hostname.clone(),
                    device.script.clone(),
                    device.subname.clone(),
                    device.attached_subname.clone(),
                    parse_kind(device.kind.as_deref()),
                    device.checked,
                    device.extra.clone(),
                )
                .await;
        }
        info!(count = devices.len(), "registry loaded devices from config");
    }

    async fn publish_transitions(&self, transitions: Vec<(String, Option<String>, Option<String>)>) {
        for (attached_name, _before, after) in transitions {
            debug!(%attached_name, ?after, "device endpoint transition");
            self.bus.publish_device_event((attached_name, after)).await;
        }
    }
}

#[async_trait]
impl Service for RegistryService {
    async fn init(&self) -> Result<()> {
        info!("registry service initialized");
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let mut rx = self.bus.subscribe_commands();
        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(command) => {
                            let transitions = match command.kind.as_str() {
                                TYPE_DNS => {
                                    if let Some(hostname) = command.get_str("hostname") {
                                        self.registry.apply_dns(hostname, command.get_str("ip")).await
                                    } else {
                                        Vec::new()
                                    }
                                }
                                TYPE_DNS_SUB => {
                                    if let Some(subname) = command.get_str("hostname") {
                                        self.registry.apply_dns_sub(subname, command.get_str("ip")).await;
                                    }
                                    Vec::new()
                                }
                                TYPE_ZEROCONF => {
                                    match (command.get_str("name"), command.get_str("ip"), command.get_u16("port")) {
                                        (Some(name), Some(ip), Some(port)) => {
                                            self.registry.apply_mdns(name, ip, port).await
                                        }
                                        _ => Vec::new(),
                                    }
                                }
                                TYPE_ZEROCONF_REMOVED => {
                                    if let Some(name) = command.get_str("name") {
                                        self.registry.apply_mdns_removed(name).await
                                    } else {
                                        Vec::new()
                                    }
                                }
                                _ => Vec::new(),
                            };
                            self.publish_transitions(transitions).await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "registry service lagged behind command bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = self.handle.wait_for_cancel() => {
                    info!("registry service shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle(&self) -> Option<&ServiceHandle> {
        Some(&self.handle)
    }
}
