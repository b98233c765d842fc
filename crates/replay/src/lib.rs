use std::collections::HashMap;

use async_trait::async_trait;
use bus::CommandBus;
use miette::Result;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use types::{Command, Service, ServiceHandle, REPLAY_TYPES};

/// Remembers the last command of each replayable type (`REPLAY_TYPES`) and
/// re-delivers it, targeted, the moment a device
/// transitions from absent (`None` endpoint) to present — a device that
/// joins late still gets told its file name even though the broadcast that
/// originally carried it is long gone.
pub struct ReplayService {
    bus: CommandBus,
    last_value: Mutex<HashMap<String, Command>>,
    handle: ServiceHandle,
}

impl ReplayService {
    pub fn new(bus: CommandBus) -> Self {
        Self {
            bus,
            last_value: Mutex::new(HashMap::new()),
            handle: ServiceHandle::new(),
        }
    }

    async fn observe_command(&self, command: &Command) {
        if REPLAY_TYPES.contains(&command.kind.as_str()) {
            debug!(kind = %command.kind, "caching last-value command for replay");
            self.last_value
                .lock()
                .await
                .insert(command.kind.clone(), command.clone());
        }
    }

    async fn replay_to(&self, attached_name: &str) {
        let cache = self.last_value.lock().await;
        for command in cache.values() {
            let targeted = command.clone().with("device", attached_name.to_string());
            self.bus.publish_command(targeted).await;
        }
    }
}

#[async_trait]
impl Service for ReplayService {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let mut commands = self.bus.subscribe_commands();
        let mut devices = self.bus.subscribe_devices();

        loop {
            tokio::select! {
                result = commands.recv() => {
                    match result {
                        Ok(command) => self.observe_command(&command).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "replay service lagged behind command bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                result = devices.recv() => {
                    match result {
                        Ok((attached_name, Some(_endpoint))) => {
                            self.replay_to(&attached_name).await;
                        }
                        Ok((_, None)) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "replay service lagged behind device events");
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
