use async_trait::async_trait;
use bus::CommandBus;
use config::ListenServerConfig;
use futures_util::StreamExt;
use miette::Result;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use types::{Command, Service, ServiceHandle};

/// Optional upstream bridge: connects out to a pre-existing listener
/// (`listen_server.uri` in config) and republishes whatever JSON command
/// frames it sends onto the local command bus.
///
/// This does not dynamically load or normalize anything — `module`/
/// `entrypoint` are kept in config for operator familiarity but are not
/// consulted; the upstream's wire schema is assumed to already match ours.
pub struct BridgeService {
    bus: CommandBus,
    config: ListenServerConfig,
    handle: ServiceHandle,
}

impl BridgeService {
    pub fn new(bus: CommandBus, config: ListenServerConfig) -> Self {
        Self {
            bus,
            config,
            handle: ServiceHandle::new(),
        }
    }

    async fn run_once(&self) -> Result<()> {
        let (ws_stream, _) = connect_async(&self.config.uri)
            .await
            .map_err(|e| miette::miette!("failed to connect to upstream bridge: {e}"))?;
        info!(uri = %self.config.uri, "connected to upstream bridge");

        let (_write, mut read) = ws_stream.split();
        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.ingest(&text).await,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "upstream bridge connection error");
                            break;
                        }
                    }
                }
                _ = self.handle.wait_for_cancel() => break,
            }
        }
        Ok(())
    }

    async fn ingest(&self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(value) if value.is_object() => match serde_json::from_value::<Command>(value) {
                Ok(command) => {
                    debug!(kind = %command.kind, "ingested command from upstream bridge");
                    self.bus.publish_command(command).await;
                }
                Err(e) => warn!(error = %e, "bridge frame missing `type`"),
            },
            Ok(_) => warn!("rejected non-object bridge frame"),
            Err(e) => warn!(error = %e, "failed to parse bridge frame as json"),
        }
    }
}

#[async_trait]
impl Service for BridgeService {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        while !self.handle.is_stopped() {
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "upstream bridge disconnected, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
                    _ = self.handle.wait_for_cancel() => break,
                }
            }
        }
        Ok(())
    }

    fn handle(&self) -> Option<&ServiceHandle> {
        Some(&self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> BridgeService {
        BridgeService::new(
            CommandBus::new(),
            ListenServerConfig {
                module: String::new(),
                entrypoint: String::new(),
                uri: "ws://127.0.0.1:0".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn object_frame_reaches_the_bus() {
        let bridge = bridge();
        let mut commands = bridge.bus.subscribe_commands();

        bridge.ingest(r#"{"type":"recording_start"}"#).await;

        let command = commands.recv().await.expect("receives command");
        assert_eq!(command.kind, "recording_start");
    }

    #[tokio::test]
    async fn non_object_frame_is_dropped() {
        let bridge = bridge();
        let mut commands = bridge.bus.subscribe_commands();

        bridge.ingest(r#""just a string""#).await;
        bridge.ingest(r#"{"type":"recording_stop"}"#).await;

        let command = commands.recv().await.expect("receives the next command");
        assert_eq!(command.kind, "recording_stop");
    }
}
