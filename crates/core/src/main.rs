use std::sync::Arc;

use config::Config;
use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use tokio::signal;
use tracing::{error, info};

mod lifecycle;
use lifecycle::System;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    logging::setup_logging()?;

    info!("");
    info!("   {} {}", "▲ Mocap Relay".magenta(), VERSION.magenta());

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::from_file(&config_path).await.into_diagnostic()?;

    let system = Arc::new(System::new(&config)?);
    system.load_devices(&config).await;
    system.start().await?;

    info!("coordinator running, press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => {
            system.shutdown().await?;
            std::process::exit(0);
        }
        Err(err) => {
            error!("unable to listen for shutdown signal: {err}");
            std::process::exit(1);
        }
    }
}
