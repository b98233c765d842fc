use std::sync::Arc;
use std::time::Instant;

use adapters::AdapterRegistry;
use async_trait::async_trait;
use bus::CommandBus;
use miette::Result;
use registry::DeviceRegistry;
use tracing::{debug, error, warn};
use types::{Command, Device, Service, ServiceHandle, TYPE_HEALTH, TYPE_HEALTH_RESPONSE};

/// Classifies every non-discovery command off the bus and routes it to the
/// device adapters that should receive it.
///
/// - `dns` / `dns_sub` / `zeroconf` / `zeroconf_removed` are discovery-
///   internal and were already consumed by the registry service; the
///   dispatcher drops them.
/// - `health_response` is inbound telemetry from an adapter, not an
///   outbound instruction, and is intercepted here to update the registry.
/// - The broadcast types fan out to every dispatchable (checked, with a
///   resolved `ip`+`port`) device; `health` fans out on its own looser gate
///   (checked, with an `ip` — no port required).
/// - Everything else is targeted at `target_device()`.
pub struct Dispatcher {
    bus: CommandBus,
    registry: Arc<DeviceRegistry>,
    adapters: Arc<AdapterRegistry>,
    handle: ServiceHandle,
}

impl Dispatcher {
    pub fn new(bus: CommandBus, registry: Arc<DeviceRegistry>, adapters: Arc<AdapterRegistry>) -> Self {
        Self {
            bus,
            registry,
            adapters,
            handle: ServiceHandle::new(),
        }
    }

    async fn dispatch_to(&self, device: &Device, command: &Command) {
        let adapter = match self.adapters.resolve(&device.adapter_ref) {
            Ok(adapter) => adapter,
            Err(e) => {
                error!(device = %device.attached_name, error = %e, "no adapter for device");
                return;
            }
        };

        let enriched = command.enriched(
            device.ip.as_deref(),
            device.port,
            device.sub_ip.as_deref(),
        );

        match adapter.handle(device, &enriched).await {
            Ok(()) => {
                if command.kind == TYPE_HEALTH {
                    self.registry
                        .touch_health_response(&device.attached_name, Instant::now())
                        .await;
                    self.registry.set_reachable(&device.attached_name, true).await;
                    self.bus
                        .publish_command(
                            Command::new(TYPE_HEALTH_RESPONSE)
                                .with("device", device.attached_name.clone())
                                .with("value", true),
                        )
                        .await;
                }
            }
            Err(e) => {
                warn!(device = %device.attached_name, error = %e, "adapter call failed");
                self.registry.set_reachable(&device.attached_name, false).await;
                self.bus
                    .publish_command(
                        Command::new(TYPE_HEALTH_RESPONSE)
                            .with("device", device.attached_name.clone())
                            .with("value", false)
                            .with("msg", e.to_string()),
                    )
                    .await;
            }
        }
    }

    async fn handle_command(&self, command: Command) {
        if command.is_discovery_internal() {
            return;
        }

        if command.kind == TYPE_HEALTH_RESPONSE {
            if let Some(name) = command.target_device() {
                if command.get_bool("value").unwrap_or(false) {
                    self.registry.touch_health_response(name, Instant::now()).await;
                    self.registry.set_reachable(name, true).await;
                } else {
                    self.registry.set_reachable(name, false).await;
                }
            }
            return;
        }

        // An explicit `device` field always wins over the command type's
        // default fan-out, so a replayed last-value command (itself a
        // broadcast type) can be aimed at exactly the device that just
        // reconnected instead of hitting every dispatchable device again.
        if command.get_str("device").is_none() && command.is_broadcast() {
            for device in self.registry.dispatchable().await {
                self.dispatch_to(&device, &command).await;
            }
            return;
        }

        // `health` fans out on its own, looser gate (spec.md §4.5: `ip ≠ ∅`
        // and `checked`, no port required) — a DNS-only device with no SRV
        // port must still be probed, unlike the broadcast command types above.
        if command.get_str("device").is_none() && command.kind == TYPE_HEALTH {
            for device in self.registry.probe_eligible().await {
                self.dispatch_to(&device, &command).await;
            }
            return;
        }

        let Some(name) = command.target_device() else {
            debug!(kind = %command.kind, "command has no target device, dropping");
            return;
        };
        let Some(device) = self.registry.get(name).await else {
            debug!(kind = %command.kind, device = name, "unknown target device, dropping");
            return;
        };
        if !device.is_dispatchable() {
            debug!(device = %device.attached_name, "target device not dispatchable, dropping");
            return;
        }
        self.dispatch_to(&device, &command).await;
    }
}

#[async_trait]
impl Service for Dispatcher {
    /// Plugin/Adapter Host startup step (spec.md §4.7): for each configured
    /// device, resolve its adapter and call `init` once before any command
    /// can reach it. A device whose adapter kind doesn't resolve is logged
    /// and simply never dispatched to later.
    async fn init(&self) -> Result<()> {
        for device in self.registry.snapshot().await {
            match self.adapters.resolve(&device.adapter_ref) {
                Ok(adapter) => {
                    if let Err(e) = adapter.init(&device).await {
                        error!(device = %device.attached_name, error = %e, "adapter init failed");
                    }
                }
                Err(e) => {
                    error!(device = %device.attached_name, error = %e, "no adapter for device at startup");
                }
            }
        }
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let mut rx = self.bus.subscribe_commands();
        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(command) => self.handle_command(command).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "dispatcher lagged behind command bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = self.handle.wait_for_cancel() => break,
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
    use adapters::DeviceAdapter;
    use std::sync::Mutex as StdMutex;
    use types::{DeviceKind, TYPE_DNS, TYPE_FILE_NAME, TYPE_HEALTH_TIMEOUT};

    struct RecordingAdapter {
        inits: StdMutex<Vec<String>>,
        handled: StdMutex<Vec<(String, String)>>,
        fail_handle: bool,
    }

    impl RecordingAdapter {
        fn new(fail_handle: bool) -> Self {
            Self {
                inits: StdMutex::new(Vec::new()),
                handled: StdMutex::new(Vec::new()),
                fail_handle,
            }
        }
    }

    #[async_trait]
    impl DeviceAdapter for RecordingAdapter {
        async fn init(&self, device: &Device) -> Result<()> {
            self.inits.lock().unwrap().push(device.attached_name.clone());
            Ok(())
        }

        async fn handle(&self, device: &Device, command: &Command) -> Result<()> {
            self.handled
                .lock()
                .unwrap()
                .push((device.attached_name.clone(), command.kind.clone()));
            if self.fail_handle {
                Err(miette::miette!("simulated adapter failure"))
            } else {
                Ok(())
            }
        }
    }

    async fn dispatcher_with(
        adapter: Arc<RecordingAdapter>,
        devices: &[(&str, &str, bool, Option<(&str, u16)>)],
    ) -> (Dispatcher, Arc<DeviceRegistry>, CommandBus) {
        let bus = CommandBus::new();
        let registry = Arc::new(DeviceRegistry::new());
        for (name, hostname, checked, endpoint) in devices {
            registry
                .register(
                    *name,
                    *hostname,
                    "mock",
                    None,
                    None,
                    DeviceKind::Camera,
                    *checked,
                    Default::default(),
                )
                .await;
            if let Some((ip, port)) = endpoint {
                registry.apply_mdns(name, ip, *port).await;
            }
        }
        let mut adapters = AdapterRegistry::new();
        adapters.register("mock", adapter);
        let adapters = Arc::new(adapters);
        let dispatcher = Dispatcher::new(bus.clone(), registry.clone(), adapters);
        (dispatcher, registry, bus)
    }

    #[tokio::test]
    async fn init_calls_every_device_adapter_once() {
        let adapter = Arc::new(RecordingAdapter::new(false));
        let (dispatcher, _registry, _bus) = dispatcher_with(
            adapter.clone(),
            &[
                ("cam-01", "cam-01.local", true, Some(("10.0.0.5", 5000))),
                ("cam-02", "cam-02.local", true, None),
            ],
        )
        .await;

        dispatcher.init().await.expect("init succeeds");
        let inits = adapter.inits.lock().unwrap();
        assert_eq!(inits.len(), 2);
        assert!(inits.contains(&"cam-01".to_string()));
        assert!(inits.contains(&"cam-02".to_string()));
    }

    #[tokio::test]
    async fn discovery_internal_commands_are_dropped() {
        let adapter = Arc::new(RecordingAdapter::new(false));
        let (dispatcher, _registry, _bus) = dispatcher_with(
            adapter.clone(),
            &[("cam-01", "cam-01.local", true, Some(("10.0.0.5", 5000)))],
        )
        .await;

        dispatcher
            .handle_command(Command::new(TYPE_DNS).with("hostname", "cam-01.local"))
            .await;
        assert!(adapter.handled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_dispatchable_device() {
        let adapter = Arc::new(RecordingAdapter::new(false));
        let (dispatcher, _registry, _bus) = dispatcher_with(
            adapter.clone(),
            &[
                ("cam-01", "cam-01.local", true, Some(("10.0.0.5", 5000))),
                ("cam-02", "cam-02.local", true, Some(("10.0.0.6", 5000))),
                ("cam-03", "cam-03.local", false, Some(("10.0.0.7", 5000))),
            ],
        )
        .await;

        dispatcher
            .handle_command(Command::new(TYPE_FILE_NAME).with("value", "take_01"))
            .await;

        let handled = adapter.handled.lock().unwrap();
        assert_eq!(handled.len(), 2);
        assert!(handled.iter().any(|(name, _)| name == "cam-01"));
        assert!(handled.iter().any(|(name, _)| name == "cam-02"));
        assert!(!handled.iter().any(|(name, _)| name == "cam-03"));
    }

    /// Scenarios 1–3: a DNS-only device (resolved via `apply_dns`, no mDNS
    /// SRV port) must still receive `health` probes even though it never
    /// becomes `is_dispatchable()` (which requires a port).
    #[tokio::test]
    async fn health_reaches_dns_only_device_without_a_port() {
        let adapter = Arc::new(RecordingAdapter::new(false));
        let (dispatcher, registry, _bus) =
            dispatcher_with(adapter.clone(), &[("cam-01", "cam-01.local", true, None)]).await;
        registry.apply_dns("cam-01.local", Some("10.0.0.5")).await;
        assert!(!registry.get("cam-01").await.unwrap().is_dispatchable());

        dispatcher.handle_command(Command::new(TYPE_HEALTH)).await;

        let handled = adapter.handled.lock().unwrap();
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].0, "cam-01");
    }

    #[tokio::test]
    async fn targeted_command_with_device_field_skips_broadcast() {
        let adapter = Arc::new(RecordingAdapter::new(false));
        let (dispatcher, _registry, _bus) = dispatcher_with(
            adapter.clone(),
            &[
                ("cam-01", "cam-01.local", true, Some(("10.0.0.5", 5000))),
                ("cam-02", "cam-02.local", true, Some(("10.0.0.6", 5000))),
            ],
        )
        .await;

        dispatcher
            .handle_command(
                Command::new(TYPE_FILE_NAME)
                    .with("value", "take_02")
                    .with("device", "cam-02"),
            )
            .await;

        let handled = adapter.handled.lock().unwrap();
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].0, "cam-02");
    }

    #[tokio::test]
    async fn health_timeout_targets_device_via_value_alias() {
        let adapter = Arc::new(RecordingAdapter::new(false));
        let (dispatcher, _registry, _bus) = dispatcher_with(
            adapter.clone(),
            &[("cam-01", "cam-01.local", true, Some(("10.0.0.5", 5000)))],
        )
        .await;

        dispatcher
            .handle_command(Command::new(TYPE_HEALTH_TIMEOUT).with("value", "cam-01"))
            .await;

        let handled = adapter.handled.lock().unwrap();
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].0, "cam-01");
    }

    #[tokio::test]
    async fn adapter_failure_on_health_synthesizes_negative_response() {
        let adapter = Arc::new(RecordingAdapter::new(true));
        let (dispatcher, registry, bus) = dispatcher_with(
            adapter.clone(),
            &[("cam-01", "cam-01.local", true, Some(("10.0.0.5", 5000)))],
        )
        .await;
        let mut rx = bus.subscribe_commands();

        dispatcher.handle_command(Command::new(TYPE_HEALTH)).await;

        let synthesized = rx.recv().await.expect("receives synthesized response");
        assert_eq!(synthesized.kind, TYPE_HEALTH_RESPONSE);
        assert_eq!(synthesized.get_bool("value"), Some(false));
        assert!(!registry.get("cam-01").await.unwrap().reachable);
    }

    #[tokio::test]
    async fn unresolved_target_is_dropped_without_dispatch() {
        let adapter = Arc::new(RecordingAdapter::new(false));
        let (dispatcher, _registry, _bus) = dispatcher_with(
            adapter.clone(),
            &[("cam-01", "cam-01.local", true, None)],
        )
        .await;

        dispatcher
            .handle_command(
                Command::new(TYPE_FILE_NAME)
                    .with("value", "take_03")
                    .with("device", "cam-01"),
            )
            .await;

        assert!(adapter.handled.lock().unwrap().is_empty());
    }
}
