use std::sync::Arc;
use std::time::Duration;

use bus::CommandBus;
use registry::DeviceRegistry;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;
use types::Command;

const SWEEP_INTERVAL: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// `mdns-sd` doesn't reliably deliver `ServiceRemoved` for devices that drop
/// off the network without a clean goodbye packet. This sweeper
/// periodically TCP-probes every resolved device's endpoint and, on a
/// failed connect, synthesizes the same `zeroconf_removed` command a clean
/// mDNS removal would have produced — the registry can't tell the
/// difference.
pub struct TcpProbeSweeper {
    registry: Arc<DeviceRegistry>,
    bus: CommandBus,
}

impl TcpProbeSweeper {
    pub fn new(registry: Arc<DeviceRegistry>, bus: CommandBus) -> Self {
        Self { registry, bus }
    }

    async fn sweep(&self) {
        let devices = self.registry.snapshot().await;
        for device in devices {
            if !device.resolved {
                continue;
            }
            let (Some(ip), Some(port)) = (device.ip.as_deref(), device.port) else {
                continue;
            };
            let addr = format!("{ip}:{port}");
            let reachable = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false);

            if !reachable {
                debug!(name = %device.attached_name, %addr, "tcp probe failed, synthesizing removal");
                self.bus
                    .publish_command(
                        Command::new(types::TYPE_ZEROCONF_REMOVED)
                            .with("name", device.attached_name.clone()),
                    )
                    .await;
            }
        }
    }

    pub async fn run(&self, cancel: impl std::future::Future<Output = ()>) {
        tokio::pin!(cancel);
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = &mut cancel => {
                    tracing::info!("tcp probe sweeper shutting down");
                    break;
                }
            }
        }
    }
}
