use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bus::CommandBus;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use registry::DeviceRegistry;
use tokio::sync::Mutex;
use tracing::debug;
use types::Command;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Last resolution outcome recorded for one hostname, used to edge-trigger
/// `dns`/`dns_sub` publication: spec.md §4.2 only wants a command on a
/// *new or changed* success, or on the single failure that follows a prior
/// success — repeated failures after that are silent until a success
/// re-arms the edge.
#[derive(Clone, PartialEq, Eq, Debug)]
enum LastSeen {
    Unknown,
    Resolved(String),
    Failed,
}

/// Pure edge-detection step, factored out of `resolve_edge` so it can be
/// unit-tested without a live resolver: given the previously recorded state
/// and this tick's lookup result, returns the new state to record plus
/// `Some(ip)` when a command should be published.
fn edge(previous: &LastSeen, ip: Option<&str>) -> (LastSeen, Option<Option<String>>) {
    match (previous, ip) {
        (LastSeen::Resolved(prev_ip), Some(ip)) if prev_ip == ip => (previous.clone(), None),
        (_, Some(ip)) => (LastSeen::Resolved(ip.to_string()), Some(Some(ip.to_string()))),
        (LastSeen::Resolved(_), None) => (LastSeen::Failed, Some(None)),
        (LastSeen::Failed, None) | (LastSeen::Unknown, None) => (LastSeen::Failed, None),
    }
}

/// Periodic DNS A-record resolution for configured device hostnames.
/// Resolves both the primary `hostname` and, when present, `subname` for
/// each device, emitting `dns`/`dns_sub` commands only on the edges
/// described in spec.md §4.2 — a new/changed IP, or the transition from a
/// prior success into failure.
///
/// Async resolution via `hickory-resolver` is used in place of a blocking
/// `getaddrinfo` call so a single hung lookup can't stall the whole tick.
pub struct DnsResolverLoop {
    resolver: TokioAsyncResolver,
    registry: Arc<DeviceRegistry>,
    bus: CommandBus,
    last_seen: Mutex<HashMap<String, LastSeen>>,
}

impl DnsResolverLoop {
    pub fn new(registry: Arc<DeviceRegistry>, bus: CommandBus) -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self {
            resolver,
            registry,
            bus,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    async fn resolve(&self, host: &str) -> Option<String> {
        match self.resolver.lookup_ip(host).await {
            Ok(lookup) => lookup.iter().next().map(|ip| ip.to_string()),
            Err(e) => {
                debug!(host, error = %e, "dns lookup failed");
                None
            }
        }
    }

    /// Resolves `host` and returns `Some(ip)` exactly on the edges spec.md
    /// §4.2 wants published: a first/changed success, or the failure that
    /// immediately follows a prior success (`None` inside the `Some` means
    /// "publish a departure"). Returns `None` (don't publish at all) on a
    /// repeated failure or an unchanged success.
    async fn resolve_edge(&self, host: &str) -> Option<Option<String>> {
        let ip = self.resolve(host).await;
        let mut last_seen = self.last_seen.lock().await;
        let previous = last_seen.get(host).cloned().unwrap_or(LastSeen::Unknown);
        let (next, publish) = edge(&previous, ip.as_deref());
        last_seen.insert(host.to_string(), next);
        publish
    }

    async fn tick(&self) {
        let devices = self.registry.snapshot().await;
        for device in devices {
            if let Some(ip) = self.resolve_edge(&device.hostname).await {
                self.bus
                    .publish_command(build_dns_command(&device.hostname, ip.as_deref()))
                    .await;
            }

            if let Some(subname) = &device.subname {
                if let Some(sub_ip) = self.resolve_edge(subname).await {
                    self.bus
                        .publish_command(build_dns_sub_command(subname, sub_ip.as_deref()))
                        .await;
                }
            }
        }
    }

    /// Runs until `cancel` resolves.
    pub async fn run(&self, cancel: impl std::future::Future<Output = ()>) {
        tokio::pin!(cancel);
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = &mut cancel => {
                    tracing::info!("dns resolver loop shutting down");
                    break;
                }
            }
        }
    }
}

fn build_dns_command(hostname: &str, ip: Option<&str>) -> Command {
    let mut command = Command::new(types::TYPE_DNS).with("hostname", hostname);
    if let Some(ip) = ip {
        command = command.with("ip", ip);
    }
    command
}

fn build_dns_sub_command(hostname: &str, ip: Option<&str>) -> Command {
    let mut command = Command::new(types::TYPE_DNS_SUB).with("hostname", hostname);
    if let Some(ip) = ip {
        command = command.with("ip", ip);
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_success_publishes() {
        let (next, publish) = edge(&LastSeen::Unknown, Some("10.0.0.5"));
        assert_eq!(next, LastSeen::Resolved("10.0.0.5".to_string()));
        assert_eq!(publish, Some(Some("10.0.0.5".to_string())));
    }

    #[test]
    fn unchanged_success_is_silent() {
        let previous = LastSeen::Resolved("10.0.0.5".to_string());
        let (next, publish) = edge(&previous, Some("10.0.0.5"));
        assert_eq!(next, previous);
        assert_eq!(publish, None);
    }

    #[test]
    fn changed_success_publishes() {
        let previous = LastSeen::Resolved("10.0.0.5".to_string());
        let (next, publish) = edge(&previous, Some("10.0.0.6"));
        assert_eq!(next, LastSeen::Resolved("10.0.0.6".to_string()));
        assert_eq!(publish, Some(Some("10.0.0.6".to_string())));
    }

    #[test]
    fn failure_after_success_publishes_departure_once() {
        let previous = LastSeen::Resolved("10.0.0.5".to_string());
        let (next, publish) = edge(&previous, None);
        assert_eq!(next, LastSeen::Failed);
        assert_eq!(publish, Some(None));
    }

    #[test]
    fn repeated_failure_is_silent() {
        let (next, publish) = edge(&LastSeen::Failed, None);
        assert_eq!(next, LastSeen::Failed);
        assert_eq!(publish, None);
    }

    #[test]
    fn success_after_failure_re_arms_and_publishes() {
        let (next, publish) = edge(&LastSeen::Failed, Some("10.0.0.5"));
        assert_eq!(next, LastSeen::Resolved("10.0.0.5".to_string()));
        assert_eq!(publish, Some(Some("10.0.0.5".to_string())));
    }
}
