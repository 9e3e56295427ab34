//! Simcore Client - headless client that joins a server and wanders around

use clap::Parser;
use tracing::info;

use simcore::app::{init_tracing, run_client};
use simcore::config::{ClientArgs, ClientConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ClientConfig::from_args(ClientArgs::parse())?;

    init_tracing(&config.log_level);

    info!("Starting Simcore Client");
    run_client(config).await
}
