use std::sync::Arc;

use adapters::AdapterRegistry;
use bus::CommandBus;
use config::Config;
use discovery::DiscoveryService;
use dispatch::Dispatcher;
use health::HealthEngine;
use ingress::{BridgeService, IngressService};
use miette::{IntoDiagnostic, Result};
use registry::{DeviceRegistry, RegistryService};
use replay::ReplayService;
use tracing::info;
use types::{Command, Service, TYPE_ZEROCONF_REMOVED};

/// Owns every long-running piece of the coordinator and starts, stops, and
/// restarts them as a unit.
pub struct System {
    bus: CommandBus,
    registry: Arc<DeviceRegistry>,
    registry_service: Arc<RegistryService>,
    discovery: Arc<DiscoveryService>,
    health: Arc<HealthEngine>,
    dispatcher: Arc<Dispatcher>,
    ingress: Arc<IngressService>,
    replay: Arc<ReplayService>,
    bridge: Option<Arc<BridgeService>>,
}

impl System {
    pub fn new(config: &Config) -> Result<Self> {
        let bus = CommandBus::new();
        let registry_service = Arc::new(RegistryService::new(bus.clone()));
        let registry = registry_service.registry();
        let adapters = Arc::new(AdapterRegistry::builtin(bus.clone()));
        let discovery =
            Arc::new(DiscoveryService::new(registry.clone(), bus.clone(), None).into_diagnostic()?);
        let health = Arc::new(HealthEngine::new(registry.clone(), bus.clone()));
        let dispatcher = Arc::new(Dispatcher::new(bus.clone(), registry.clone(), adapters));
        let ingress = Arc::new(IngressService::new(bus.clone(), config.server.clone()));
        let replay = Arc::new(ReplayService::new(bus.clone()));
        let bridge = config
            .listen_server
            .clone()
            .map(|cfg| Arc::new(BridgeService::new(bus.clone(), cfg)));

        Ok(Self {
            bus,
            registry,
            registry_service,
            discovery,
            health,
            dispatcher,
            ingress,
            replay,
            bridge,
        })
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    pub async fn load_devices(&self, config: &Config) {
        self.registry_service.load_devices(&config.devices).await;
    }

    /// Order matters: the registry, dispatcher, and replay cache all
    /// subscribe to the bus and must be up before discovery, ingress, or
    /// health start publishing onto it.
    pub async fn start(&self) -> Result<()> {
        self.registry_service.clone().start().await?;
        self.dispatcher.clone().start().await?;
        self.replay.clone().start().await?;

        info!("starting discovery (dns resolver, mdns browser, tcp-probe sweeper)");
        self.discovery.clone().start().await?;
        info!("starting ingress (http + websocket)");
        self.ingress.clone().start().await?;
        info!("starting health engine");
        self.health.clone().start().await?;

        if let Some(bridge) = &self.bridge {
            info!("starting upstream bridge");
            bridge.clone().start().await?;
        }

        Ok(())
    }

    /// Halts every loop and closes every listener. Subscribers are not
    /// notified — shutdown is not an observable bus event.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(bridge) = &self.bridge {
            bridge.stop().await?;
        }
        self.health.stop().await?;
        self.ingress.stop().await?;
        self.discovery.stop().await?;
        self.replay.stop().await?;
        self.dispatcher.stop().await?;
        self.registry_service.stop().await?;
        Ok(())
    }

    /// The observable teardown/reconstruction: announce every known mDNS
    /// service as removed and every device as gone, reset the health clock,
    /// then tear down and bring the whole system back up against the same
    /// (still-loaded) device table.
    pub async fn restart(&self) -> Result<()> {
        info!("restart requested: announcing service/device loss before teardown");

        for name in self.discovery.known_service_names().await {
            self.bus
                .publish_command(Command::new(TYPE_ZEROCONF_REMOVED).with("name", name))
                .await;
        }
        for device in self.registry.snapshot().await {
            self.bus
                .publish_device_event((device.attached_name, None))
                .await;
        }
        self.registry.reset_health_timestamps().await;

        self.shutdown().await?;
        self.start().await
    }
}
