use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bus::CommandBus;
use miette::Result;
use registry::DeviceRegistry;
use tokio::sync::Mutex;
use tracing::{debug, info};
use types::{Command, Service, ServiceHandle, TYPE_HEALTH, TYPE_HEALTH_TIMEOUT};

/// Default probe interval `H`: how often a broadcast `health` command goes
/// out to every checked, resolved device.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(2000);

/// Default grace `G` added on top of the probe interval before a device
/// that hasn't answered is considered timed out.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(750);

/// Drives two independent ticks against the device table:
/// a probe tick every `H` that broadcasts `health`, and a timeout tick
/// every `H/2` that watches `last_health_response_at` and emits a single
/// edge-triggered `health_timeout` the moment a device falls silent for
/// longer than `H + G` — and clears that flag the moment it answers again,
/// so a device that times out twice gets two timeout commands, not one.
pub struct HealthEngine {
    bus: CommandBus,
    registry: Arc<DeviceRegistry>,
    probe_interval: Duration,
    grace: Duration,
    started_at: Instant,
    flagged: Mutex<HashSet<String>>,
    handle: ServiceHandle,
}

impl HealthEngine {
    pub fn new(registry: Arc<DeviceRegistry>, bus: CommandBus) -> Self {
        Self::with_intervals(registry, bus, DEFAULT_PROBE_INTERVAL, DEFAULT_GRACE)
    }

    pub fn with_intervals(
        registry: Arc<DeviceRegistry>,
        bus: CommandBus,
        probe_interval: Duration,
        grace: Duration,
    ) -> Self {
        Self {
            bus,
            registry,
            probe_interval,
            grace,
            started_at: Instant::now(),
            flagged: Mutex::new(HashSet::new()),
            handle: ServiceHandle::new(),
        }
    }

    async fn probe_tick(&self) {
        debug!("broadcasting health probe");
        self.bus.publish_command(Command::new(TYPE_HEALTH)).await;
    }

    async fn timeout_tick(&self) {
        let now = Instant::now();
        let threshold = self.probe_interval + self.grace;
        // spec.md §4.5: gated on `resolved && checked`, not on having a port —
        // a DNS-only device with no SRV port must still be watched for timeout.
        let devices = self.registry.timeout_eligible().await;
        let mut flagged = self.flagged.lock().await;

        for device in devices {
            let is_late = match device.last_health_response_at {
                Some(last) => now.duration_since(last) > threshold,
                None => now.duration_since(self.started_at) > threshold,
            };

            if is_late {
                if flagged.insert(device.attached_name.clone()) {
                    info!(device = %device.attached_name, "device health timeout");
                    self.bus
                        .publish_command(
                            Command::new(TYPE_HEALTH_TIMEOUT).with("device", device.attached_name),
                        )
                        .await;
                }
            } else {
                flagged.remove(&device.attached_name);
            }
        }
    }
}

#[async_trait]
impl Service for HealthEngine {
    async fn init(&self) -> Result<()> {
        info!(
            probe_interval = ?self.probe_interval,
            grace = ?self.grace,
            "health engine initialized"
        );
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let mut probe_ticker = tokio::time::interval(self.probe_interval);
        let mut timeout_ticker = tokio::time::interval(self.probe_interval / 2);

        loop {
            tokio::select! {
                _ = probe_ticker.tick() => self.probe_tick().await,
                _ = timeout_ticker.tick() => self.timeout_tick().await,
                _ = self.handle.wait_for_cancel() => {
                    info!("health engine shutting down");
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

#[cfg(test)]
mod tests {
    use super::*;
    use types::DeviceKind;

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_once_until_device_answers_again() {
        let registry = Arc::new(DeviceRegistry::new());
        registry
            .register("cam-01", "cam-01.local", "generic_ws", None, None, DeviceKind::Camera, true, Default::default())
            .await;
        registry.apply_mdns("cam-01", "10.0.0.5", 5000).await;

        let bus = CommandBus::new();
        let mut rx = bus.subscribe_commands();
        let engine = HealthEngine::with_intervals(
            registry.clone(),
            bus,
            Duration::from_millis(100),
            Duration::from_millis(50),
        );

        tokio::time::advance(Duration::from_millis(200)).await;
        engine.timeout_tick().await;
        let first = rx.try_recv().expect("first timeout command");
        assert_eq!(first.kind, TYPE_HEALTH_TIMEOUT);

        engine.timeout_tick().await;
        assert!(rx.try_recv().is_err(), "should not re-fire while still late");

        registry.touch_health_response("cam-01", Instant::now()).await;
        engine.timeout_tick().await;
        assert!(rx.try_recv().is_err(), "clearing the flag shouldn't itself publish");
    }

    /// Scenario 3 / P2: a device resolved only via DNS (no mDNS SRV port,
    /// so never `is_dispatchable()`) must still time out on silence.
    #[tokio::test(start_paused = true)]
    async fn timeout_fires_for_dns_only_device_without_a_port() {
        let registry = Arc::new(DeviceRegistry::new());
        registry
            .register("cam-01", "cam-01.local", "generic_ws", None, None, DeviceKind::Camera, true, Default::default())
            .await;
        registry.apply_dns("cam-01.local", Some("10.0.0.5")).await;
        assert!(!registry.get("cam-01").await.unwrap().is_dispatchable());

        let bus = CommandBus::new();
        let mut rx = bus.subscribe_commands();
        let engine = HealthEngine::with_intervals(
            registry.clone(),
            bus,
            Duration::from_millis(100),
            Duration::from_millis(50),
        );

        tokio::time::advance(Duration::from_millis(200)).await;
        engine.timeout_tick().await;
        let first = rx.try_recv().expect("first timeout command");
        assert_eq!(first.kind, TYPE_HEALTH_TIMEOUT);
    }
}
