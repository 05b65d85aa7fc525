//! OpenMesh - Community WiFi node pipeline
//!
//! Registry, topology, rewards and live events for a community WiFi
//! network, backed by an external ledger.

use openmesh_core::{run_node, Config};
use std::error::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Parse CLI arguments and build config
    let config = Config::from_cli()?;

    // Initialize logging
    init_logging(&config.log_level);

    tracing::info!("Starting OpenMesh node pipeline...");

    // Run the service
    run_node(config).await?;

    Ok(())
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(level))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
