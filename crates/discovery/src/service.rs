use std::sync::Arc;

use async_trait::async_trait;
use bus::CommandBus;
use miette::{IntoDiagnostic, Result};
use registry::DeviceRegistry;
use tracing::info;
use types::{Service, ServiceHandle};

use crate::dns::DnsResolverLoop;
use crate::mdns::MdnsBrowser;
use crate::probe::TcpProbeSweeper;

/// Runs the three discovery sub-loops (DNS polling, mDNS browsing, TCP-probe
/// sweeping) concurrently for the lifetime of the service.
pub struct DiscoveryService {
    dns: DnsResolverLoop,
    mdns: MdnsBrowser,
    sweeper: TcpProbeSweeper,
    handle: ServiceHandle,
}

impl DiscoveryService {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        bus: CommandBus,
        mdns_service_type: Option<String>,
    ) -> Result<Self> {
        let dns = DnsResolverLoop::new(registry.clone(), bus.clone());
        let mdns = MdnsBrowser::new(bus.clone(), mdns_service_type).into_diagnostic()?;
        let sweeper = TcpProbeSweeper::new(registry, bus);
        Ok(Self {
            dns,
            mdns,
            sweeper,
            handle: ServiceHandle::new(),
        })
    }

    /// Fullnames of every mDNS service the browser currently considers
    /// present — consumed by the lifecycle controller's restart announcement.
    pub async fn known_service_names(&self) -> Vec<String> {
        self.mdns.known_service_names().await
    }
}

#[async_trait]
impl Service for DiscoveryService {
    async fn init(&self) -> Result<()> {
        info!("discovery service initialized");
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        tokio::join!(
            self.dns.run(self.handle.wait_for_cancel()),
            self.mdns.run(self.handle.wait_for_cancel()),
            self.sweeper.run(self.handle.wait_for_cancel()),
        );
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        let _ = self.mdns.shutdown_handle().send(());
        Ok(())
    }

    fn handle(&self) -> Option<&ServiceHandle> {
        Some(&self.handle)
    }
}
