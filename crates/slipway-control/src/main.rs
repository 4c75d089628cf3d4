//! Slipway control service binary.
//!
//! Runs the control plane for orchestrating deployment jobs.

use tracing::info;
use tracing_subscriber::EnvFilter;

use slipway_control::{ControlConfig, ControlService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("slipway_control=info".parse()?),
        )
        .init();

    info!("slipway control service starting");

    // Load configuration
    let config = ControlConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        ControlConfig::default()
    });

    info!(
        listen_addr = %config.server.listen_addr,
        database = %config.database.url,
        "configuration loaded"
    );

    let service = ControlService::new(config);
    service.run().await?;

    Ok(())
}
