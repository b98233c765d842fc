use std::collections::HashSet;
use std::net::IpAddr;

use bus::CommandBus;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};
use types::Command;

use crate::error::DiscoveryError;

/// Default mDNS service type capture devices advertise under.
pub const DEFAULT_SERVICE_TYPE: &str = "_mocap._tcp.local.";

/// Browses a single mDNS service type and republishes resolutions/removals
/// as `zeroconf`/`zeroconf_removed` commands.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    service_type: String,
    bus: CommandBus,
    shutdown: broadcast::Sender<()>,
    /// Fullnames currently resolved, per the browser's own Added/Removed
    /// events (not the TCP-probe sweeper's synthesized removals). Backs the
    /// lifecycle controller's restart announcement.
    known: Mutex<HashSet<String>>,
}

impl MdnsBrowser {
    pub fn new(bus: CommandBus, service_type: Option<String>) -> Result<Self, DiscoveryError> {
        let daemon =
            ServiceDaemon::new().map_err(|e| DiscoveryError::MdnsDaemon(e.to_string()))?;
        let (shutdown, _) = broadcast::channel(1);
        Ok(Self {
            daemon,
            service_type: service_type.unwrap_or_else(|| DEFAULT_SERVICE_TYPE.to_string()),
            bus,
            shutdown,
            known: Mutex::new(HashSet::new()),
        })
    }

    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Fullnames of every service this browser currently considers present.
    pub async fn known_service_names(&self) -> Vec<String> {
        self.known.lock().await.iter().cloned().collect()
    }

    async fn handle_event(&self, event: ServiceEvent) {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                let Some(ip) = info.get_addresses().iter().next().copied() else {
                    return;
                };
                let port = info.get_port();
                let fullname = info.get_fullname().to_string();
                debug!(name = %fullname, %ip, port, "mdns service resolved");
                self.known.lock().await.insert(fullname.clone());
                self.bus
                    .publish_command(build_zeroconf_command(&fullname, ip, port))
                    .await;
            }
            ServiceEvent::ServiceRemoved(_, fullname) => {
                info!(name = %fullname, "mdns service removed");
                self.known.lock().await.remove(&fullname);
                self.bus.publish_command(
                    Command::new(types::TYPE_ZEROCONF_REMOVED).with("name", fullname),
                )
                .await;
            }
            ServiceEvent::SearchStarted(_) | ServiceEvent::SearchStopped(_) => {}
            ServiceEvent::ServiceFound(_, _) => {}
        }
    }

    /// Runs until `cancel` resolves or the browse channel closes.
    pub async fn run(&self, cancel: impl std::future::Future<Output = ()>) {
        let browse_handle = match self.daemon.browse(&self.service_type) {
            Ok(handle) => handle,
            Err(e) => {
                error!(service_type = %self.service_type, error = %e, "failed to browse mDNS service type");
                return;
            }
        };

        tokio::pin!(cancel);
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                result = browse_handle.recv_async() => {
                    match result {
                        Ok(event) => self.handle_event(event).await,
                        Err(e) => {
                            warn!(error = %e, "mdns browse channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("mdns browser shutting down (signalled)");
                    break;
                }
                _ = &mut cancel => {
                    info!("mdns browser shutting down");
                    break;
                }
            }
        }

        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "error shutting down mDNS daemon");
        }
    }
}

fn build_zeroconf_command(fullname: &str, ip: IpAddr, port: u16) -> Command {
    Command::new(types::TYPE_ZEROCONF)
        .with("name", fullname)
        .with("ip", ip.to_string())
        .with("port", port)
}
