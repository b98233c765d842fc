use std::collections::HashMap;

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;
use types::{Device, DeviceKind};

/// The authoritative device table, keyed by `attached_name`.
///
/// Every mutation returns the device's `presence()` before and after the
/// change so callers can detect a presence transition without re-reading the
/// table under a second lock acquisition. `presence()` is `None` whenever
/// `resolved` is false even if `ip`/`port` remain cached on the device.
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn register(
        &self,
        attached_name: impl Into<String>,
        hostname: impl Into<String>,
        adapter_ref: impl Into<String>,
        subname: Option<String>,
        attached_subname: Option<String>,
        kind: DeviceKind,
        checked: bool,
        extra: Map<String, Value>,
    ) {
        let attached_name = attached_name.into();
        let mut device = Device::new(attached_name.clone(), hostname, adapter_ref);
        device.subname = subname;
        device.attached_subname = attached_subname;
        device.kind = kind;
        device.checked = checked;
        device.extra = extra;
        self.devices.write().await.insert(attached_name, device);
    }

    pub async fn get(&self, attached_name: &str) -> Option<Device> {
        self.devices.read().await.get(attached_name).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Device> {
        self.devices.read().await.values().cloned().collect()
    }

    pub async fn dispatchable(&self) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.is_dispatchable())
            .cloned()
            .collect()
    }

    /// Health-probe eligible (spec.md §4.5 probe tick): has an address and
    /// the user has not unchecked it. Unlike `dispatchable()`, a port is not
    /// required — a DNS-only device with no SRV port is still probed.
    pub async fn probe_eligible(&self) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.checked && d.ip.is_some())
            .cloned()
            .collect()
    }

    /// Health-timeout eligible (spec.md §4.5 timeout tick): currently
    /// resolved and the user has not unchecked it.
    pub async fn timeout_eligible(&self) -> Vec<Device> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.checked && d.resolved)
            .cloned()
            .collect()
    }

    pub async fn attached_names(&self) -> Vec<String> {
        self.devices.read().await.keys().cloned().collect()
    }

    /// Primary-hostname DNS resolution (command type `dns`).
    /// Returns `(before, after)` endpoints for devices whose hostname
    /// matched, if any.
    pub async fn apply_dns(
        &self,
        hostname: &str,
        ip: Option<&str>,
    ) -> Vec<(String, Option<String>, Option<String>)> {
        let mut transitions = Vec::new();
        let mut guard = self.devices.write().await;
        for device in guard.values_mut() {
            if device.hostname == hostname {
                let before = device.presence();
                // A resolution failure retains the last-known `ip` (cached)
                // until a new value overwrites it; only a successful lookup
                // updates it. `resolved` still flips on every tick so the
                // presence/event view reflects the current lookup outcome.
                if let Some(ip) = ip {
                    device.ip = Some(ip.to_string());
                }
                device.resolved = ip.is_some();
                let after = device.presence();
                if before != after {
                    transitions.push((device.attached_name.clone(), before, after));
                }
            }
        }
        transitions
    }

    /// Sub-hostname DNS resolution (command type `dns_sub`) — updates
    /// `sub_ip` on devices whose `subname` matches, leaving the primary
    /// endpoint untouched.
    pub async fn apply_dns_sub(&self, subname: &str, ip: Option<&str>) {
        let mut guard = self.devices.write().await;
        for device in guard.values_mut() {
            if device.subname.as_deref() == Some(subname) {
                device.sub_ip = ip.map(str::to_string);
            }
        }
    }

    /// Finds the single device an mDNS service name resolves to: exact match
    /// against `attached_name` first, then `hostname`, then a prefix test
    /// against each in the same order — spec.md §9 open question (a)
    /// resolved as "first matching device wins", so only one device is ever
    /// returned even if several could satisfy the prefix test.
    fn match_service_name<'a>(
        devices: impl Iterator<Item = &'a mut Device>,
        service_name: &str,
    ) -> Option<&'a mut Device> {
        let mut devices: Vec<&mut Device> = devices.collect();
        if let Some(pos) = devices.iter().position(|d| d.attached_name == service_name) {
            return Some(devices.swap_remove(pos));
        }
        if let Some(pos) = devices.iter().position(|d| d.hostname == service_name) {
            return Some(devices.swap_remove(pos));
        }
        if let Some(pos) = devices
            .iter()
            .position(|d| service_name.starts_with(&d.attached_name))
        {
            return Some(devices.swap_remove(pos));
        }
        devices
            .into_iter()
            .find(|d| service_name.starts_with(&d.hostname))
    }

    /// mDNS advertisement resolution (command type `zeroconf`). See
    /// `match_service_name` for how the service name is resolved to a device.
    pub async fn apply_mdns(
        &self,
        service_name: &str,
        ip: &str,
        port: u16,
    ) -> Vec<(String, Option<String>, Option<String>)> {
        let mut guard = self.devices.write().await;
        let Some(device) = Self::match_service_name(guard.values_mut(), service_name) else {
            return Vec::new();
        };
        let before = device.presence();
        device.ip = Some(ip.to_string());
        device.port = Some(port);
        device.resolved = true;
        let after = device.presence();
        debug!(name = %device.attached_name, %ip, port, "mdns resolved device");
        if before != after {
            vec![(device.attached_name.clone(), before, after)]
        } else {
            Vec::new()
        }
    }

    /// mDNS removal (command type `zeroconf_removed`) clears `resolved`; the
    /// last-known `ip`/`port` stay cached on the device until overwritten by
    /// a later resolution, same as a DNS resolution failure.
    pub async fn apply_mdns_removed(
        &self,
        service_name: &str,
    ) -> Vec<(String, Option<String>, Option<String>)> {
        let mut guard = self.devices.write().await;
        let Some(device) = Self::match_service_name(guard.values_mut(), service_name) else {
            return Vec::new();
        };
        let before = device.presence();
        device.resolved = false;
        let after = device.presence();
        if before != after {
            vec![(device.attached_name.clone(), before, after)]
        } else {
            Vec::new()
        }
    }

    pub async fn set_reachable(&self, attached_name: &str, reachable: bool) {
        if let Some(device) = self.devices.write().await.get_mut(attached_name) {
            device.reachable = reachable;
        }
    }

    pub async fn set_checked(&self, attached_name: &str, checked: bool) {
        if let Some(device) = self.devices.write().await.get_mut(attached_name) {
            device.checked = checked;
        }
    }

    pub async fn touch_health_response(&self, attached_name: &str, at: std::time::Instant) {
        if let Some(device) = self.devices.write().await.get_mut(attached_name) {
            device.last_health_response_at = Some(at);
        }
    }

    /// A restart clears every device's health timestamp so the health
    /// engine's next timeout tick treats all devices as unheard-from.
    pub async fn reset_health_timestamps(&self) {
        for device in self.devices.write().await.values_mut() {
            device.last_health_response_at = None;
        }
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_dns_reports_transition_on_first_resolution() {
        let registry = DeviceRegistry::new();
        registry
            .register("cam-01", "cam-01.local", "generic_ws", None, None, DeviceKind::Camera, true, Default::default())
            .await;
        let transitions = registry.apply_dns("cam-01.local", Some("10.0.0.5")).await;
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].1, None);
        assert_eq!(transitions[0].2, Some("10.0.0.5".to_string()));
    }

    #[tokio::test]
    async fn apply_mdns_matches_by_attached_name_prefix() {
        let registry = DeviceRegistry::new();
        registry
            .register("cam-01", "cam-01.local", "generic_ws", None, None, DeviceKind::Camera, true, Default::default())
            .await;
        let transitions = registry.apply_mdns("cam-01 (mocap)", "10.0.0.6", 5000).await;
        assert_eq!(transitions.len(), 1);
        let device = registry.get("cam-01").await.expect("present");
        assert_eq!(device.endpoint(), Some("10.0.0.6:5000".to_string()));
    }

    #[tokio::test]
    async fn apply_mdns_exact_match_wins_over_another_devices_prefix() {
        let registry = DeviceRegistry::new();
        registry
            .register("cam-0", "cam-0.local", "generic_ws", None, None, DeviceKind::Camera, true, Default::default())
            .await;
        registry
            .register("cam-01", "cam-01.local", "generic_ws", None, None, DeviceKind::Camera, true, Default::default())
            .await;
        // "cam-01" is an exact match for the second device, but also a
        // prefix match for the first ("cam-0"); exact match must win.
        let transitions = registry.apply_mdns("cam-01", "10.0.0.6", 5000).await;
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].0, "cam-01");
        assert!(registry.get("cam-0").await.unwrap().endpoint().is_none());
    }

    #[tokio::test]
    async fn removal_clears_endpoint() {
        let registry = DeviceRegistry::new();
        registry
            .register("cam-01", "cam-01.local", "generic_ws", None, None, DeviceKind::Camera, true, Default::default())
            .await;
        registry.apply_mdns("cam-01", "10.0.0.6", 5000).await;
        let transitions = registry.apply_mdns_removed("cam-01").await;
        assert_eq!(transitions[0].2, None);
    }

    /// Scenario 4 (DNS flap): a resolution failure drops `resolved` and
    /// publishes a presence transition to `None`, but the registry's own
    /// `ip` stays cached at the last-known address rather than clearing.
    #[tokio::test]
    async fn dns_failure_after_success_keeps_ip_cached_but_reports_departure() {
        let registry = DeviceRegistry::new();
        registry
            .register("cam-01", "cam-01.local", "generic_ws", None, None, DeviceKind::Camera, true, Default::default())
            .await;

        registry.apply_dns("cam-01.local", Some("10.0.0.5")).await;

        let failure_transitions = registry.apply_dns("cam-01.local", None).await;
        assert_eq!(failure_transitions.len(), 1);
        assert_eq!(failure_transitions[0].2, None, "device event must go to None on loss");

        let device = registry.get("cam-01").await.expect("present");
        assert!(!device.resolved);
        assert_eq!(device.ip, Some("10.0.0.5".to_string()), "ip must stay cached");

        let recovery_transitions = registry.apply_dns("cam-01.local", Some("10.0.0.5")).await;
        assert_eq!(recovery_transitions.len(), 1);
        assert_eq!(recovery_transitions[0].2, Some("10.0.0.5".to_string()));
    }

    /// Same cached-address contract on the mDNS removal path: `resolved`
    /// flips but `ip`/`port` are not cleared.
    #[tokio::test]
    async fn mdns_removal_keeps_address_cached_but_reports_departure() {
        let registry = DeviceRegistry::new();
        registry
            .register("cam-01", "cam-01.local", "generic_ws", None, None, DeviceKind::Camera, true, Default::default())
            .await;
        registry.apply_mdns("cam-01", "10.0.0.6", 5000).await;

        let transitions = registry.apply_mdns_removed("cam-01").await;
        assert_eq!(transitions[0].2, None);

        let device = registry.get("cam-01").await.expect("present");
        assert!(!device.resolved);
        assert_eq!(device.ip, Some("10.0.0.6".to_string()));
        assert_eq!(device.port, Some(5000));
    }
}
