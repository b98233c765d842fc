use async_trait::async_trait;
use bus::CommandBus;
use config::ServerConfig;
use miette::Result;
use tokio::net::TcpListener;
use tracing::info;
use types::{Service, ServiceHandle};

use crate::error::IngressError;
use crate::{http, ws};

/// Runs the two command-ingress listeners: a plain HTTP POST endpoint and a
/// WebSocket endpoint, each independently
/// bound per `ServerConfig`. Both simply hand parsed commands to the same
/// `CommandBus`, so nothing downstream can tell which transport a command
/// arrived on.
pub struct IngressService {
    bus: CommandBus,
    config: ServerConfig,
    handle: ServiceHandle,
}

impl IngressService {
    pub fn new(bus: CommandBus, config: ServerConfig) -> Self {
        Self {
            bus,
            config,
            handle: ServiceHandle::new(),
        }
    }

    async fn serve_http(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.http_addr, self.config.http_port);
        let listener =
            TcpListener::bind(&addr)
                .await
                .map_err(|e| IngressError::BindFailed {
                    addr: addr.clone(),
                    details: e.to_string(),
                })?;
        info!(%addr, "http ingress listening");

        let router = http::router(self.bus.clone());
        axum::serve(listener, router)
            .with_graceful_shutdown(self.handle.wait_for_cancel())
            .await
            .map_err(|e| IngressError::ServeFailed(e.to_string()))?;
        Ok(())
    }

    async fn serve_ws(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.ws_addr, self.config.ws_port);
        let listener =
            TcpListener::bind(&addr)
                .await
                .map_err(|e| IngressError::BindFailed {
                    addr: addr.clone(),
                    details: e.to_string(),
                })?;
        info!(%addr, "websocket ingress listening");

        let router = ws::router(self.bus.clone());
        axum::serve(listener, router)
            .with_graceful_shutdown(self.handle.wait_for_cancel())
            .await
            .map_err(|e| IngressError::ServeFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Service for IngressService {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self) -> Result<()> {
        let (http, ws) = tokio::join!(self.serve_http(), self.serve_ws());
        http?;
        ws?;
        Ok(())
    }

    fn handle(&self) -> Option<&ServiceHandle> {
        Some(&self.handle)
    }
}
