use async_trait::async_trait;
use miette::Result;
use types::{Command, Device};

/// A device-speaking plugin. The `script` config field names a kind this
/// trait is registered under (see `AdapterRegistry`) rather than a file to
/// dynamically load at runtime.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Called once when a device using this adapter first becomes
    /// dispatchable. Adapters that hold no per-device connection state can
    /// leave this as a no-op.
    async fn init(&self, device: &Device) -> Result<()> {
        let _ = device;
        Ok(())
    }

    /// Translate and deliver `command` to `device`. Any error here causes
    /// the dispatcher to mark the device unreachable.
    async fn handle(&self, device: &Device, command: &Command) -> Result<()>;
}
