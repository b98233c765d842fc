use std::time::Instant;

use serde_json::{Map, Value};
use strum_macros::Display;

/// Coarse device categorization drawn from the capture roster in the system
/// overview (cameras, mocap workstations, face-capture phones, video
/// recorders). Informational only — nothing branches on it except logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DeviceKind {
    Camera,
    MocapWorkstation,
    FaceCapturePhone,
    VideoRecorder,
    Other,
}

/// Authoritative per-device state, owned by the device registry.
///
/// Invariants (enforced by the registry crate): `resolved` implies `ip` is
/// set; losing resolution clears `resolved` but keeps the last-known `ip`
/// cached until a new value overwrites it.
#[derive(Debug, Clone)]
pub struct Device {
    pub attached_name: String,
    pub hostname: String,
    pub subname: Option<String>,
    pub attached_subname: Option<String>,
    pub adapter_ref: String,
    pub kind: DeviceKind,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub sub_ip: Option<String>,
    pub resolved: bool,
    pub reachable: bool,
    pub checked: bool,
    pub last_health_response_at: Option<Instant>,
    /// Adapter-specific config keys from this device's YAML entry, passed to
    /// the adapter's `init` untouched (spec.md §4.7's "static config").
    pub extra: Map<String, Value>,
}

impl Device {
    pub fn new(
        attached_name: impl Into<String>,
        hostname: impl Into<String>,
        adapter_ref: impl Into<String>,
    ) -> Self {
        Self {
            attached_name: attached_name.into(),
            hostname: hostname.into(),
            subname: None,
            attached_subname: None,
            adapter_ref: adapter_ref.into(),
            kind: DeviceKind::Other,
            ip: None,
            port: None,
            sub_ip: None,
            resolved: false,
            reachable: false,
            checked: true,
            last_health_response_at: None,
            extra: Map::new(),
        }
    }

    /// `"ip:port"` when a port is known, otherwise the bare ip, otherwise
    /// `None`. This reflects the cached address regardless of whether it is
    /// currently `resolved` — see `presence()` for the subscriber-facing view.
    pub fn endpoint(&self) -> Option<String> {
        match (&self.ip, self.port) {
            (Some(ip), Some(port)) => Some(format!("{ip}:{port}")),
            (Some(ip), None) => Some(ip.clone()),
            (None, _) => None,
        }
    }

    /// The shape device subscribers observe: `endpoint()` while `resolved`,
    /// `None` the moment resolution is lost — even though `ip`/`port` stay
    /// cached on the device itself until overwritten.
    pub fn presence(&self) -> Option<String> {
        if self.resolved {
            self.endpoint()
        } else {
            None
        }
    }

    /// Eligible for health probing and command dispatch: has an address and
    /// the user has not unchecked it.
    pub fn is_dispatchable(&self) -> bool {
        self.checked && self.ip.is_some() && self.port.is_some()
    }
}
