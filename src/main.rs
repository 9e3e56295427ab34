//! Simcore Server - authoritative simulation server
//!
//! Loads (or builds) a world, accepts players over TCP and runs the fixed
//! step frame loop until Ctrl+C or SIGTERM.

use clap::Parser;
use tracing::info;

use simcore::app::{init_tracing, run_server};
use simcore::config::{ServerArgs, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_args(ServerArgs::parse())?;

    init_tracing(&config.log_level);

    info!("Starting Simcore Server");
    info!("Game address: {}", config.listen_addr);
    if let Some(addr) = config.status_addr {
        info!("Health check: http://{}/health", addr);
    }

    run_server(config).await?;

    info!("Server shutdown complete");
    Ok(())
}
