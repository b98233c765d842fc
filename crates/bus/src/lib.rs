use std::sync::Arc;

use async_trait::async_trait;
use miette::Result;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Duration;
use types::{Command, DeviceEvent, Service, ServiceHandle};

const COMMAND_BUFFER: usize = 1000;
const DEVICE_EVENT_BUFFER: usize = 1000;

/// The re-entrant, non-blocking publish/subscribe bus every component talks
/// over. Two independent channels: `Command` for the command stream,
/// `DeviceEvent` for presence transitions — subscribers pick the one they
/// care about.
///
/// `ServiceHandle` wraps a `Mutex`, which isn't `Clone`, so it's kept behind
/// an `Arc` here; every clone of `CommandBus` shares the same handle instead
/// of getting its own (a bare clone would make `stop()` only ever cancel one
/// copy).
pub struct CommandBus {
    command_tx: broadcast::Sender<Command>,
    device_tx: broadcast::Sender<DeviceEvent>,
    handle: Arc<ServiceHandle>,
    _keep_alive_command_rx: Arc<Mutex<Option<broadcast::Receiver<Command>>>>,
    _keep_alive_device_rx: Arc<Mutex<Option<broadcast::Receiver<DeviceEvent>>>>,
}

impl CommandBus {
    pub fn new() -> Self {
        let (command_tx, command_rx) = broadcast::channel(COMMAND_BUFFER);
        let (device_tx, device_rx) = broadcast::channel(DEVICE_EVENT_BUFFER);
        Self {
            command_tx,
            device_tx,
            handle: Arc::new(ServiceHandle::new()),
            _keep_alive_command_rx: Arc::new(Mutex::new(Some(command_rx))),
            _keep_alive_device_rx: Arc::new(Mutex::new(Some(device_rx))),
        }
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<Command> {
        self.command_tx.subscribe()
    }

    pub fn subscribe_devices(&self) -> broadcast::Receiver<DeviceEvent> {
        self.device_tx.subscribe()
    }

    /// Publish never blocks and never invokes subscriber code inline — it
    /// only pushes onto the channel's ring buffer, so a subscriber handling
    /// one command can safely publish another.
    pub async fn publish_command(&self, command: Command) {
        if self.command_tx.send(command.clone()).is_err() {
            tracing::warn!(kind = %command.kind, "publish_command: no receivers, resubscribing keep-alive");
            let mut guard = self._keep_alive_command_rx.lock().await;
            *guard = Some(self.command_tx.subscribe());
            let _ = self.command_tx.send(command);
        }
    }

    pub async fn publish_device_event(&self, event: DeviceEvent) {
        if self.device_tx.send(event.clone()).is_err() {
            tracing::warn!("publish_device_event: no receivers, resubscribing keep-alive");
            let mut guard = self._keep_alive_device_rx.lock().await;
            *guard = Some(self.device_tx.subscribe());
            let _ = self.device_tx.send(event);
        }
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CommandBus {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            device_tx: self.device_tx.clone(),
            handle: self.handle.clone(),
            _keep_alive_command_rx: self._keep_alive_command_rx.clone(),
            _keep_alive_device_rx: self._keep_alive_device_rx.clone(),
        }
    }
}

#[async_trait]
impl Service for CommandBus {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(100)) => {},
                _ = self.handle.wait_for_cancel() => break,
            }
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        *self._keep_alive_command_rx.lock().await = None;
        *self._keep_alive_device_rx.lock().await = None;
        Ok(())
    }

    fn handle(&self) -> Option<&ServiceHandle> {
        Some(&self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_commands_reach_subscribers() {
        let bus = CommandBus::new();
        let mut rx = bus.subscribe_commands();
        bus.publish_command(Command::new("health")).await;
        let received = rx.recv().await.expect("receives");
        assert_eq!(received.kind, "health");
    }

    #[tokio::test]
    async fn clones_share_the_same_channel() {
        let bus = CommandBus::new();
        let clone = bus.clone();
        let mut rx = clone.subscribe_commands();
        bus.publish_command(Command::new("health")).await;
        assert!(rx.recv().await.is_ok());
    }
}
