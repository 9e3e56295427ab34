//! Headless client runtime

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use crate::config::ClientConfig;
use crate::game::{Client, ClientState};
use crate::input::WanderInput;
use crate::net::{connect, spawn_link, LinkOptions};
use crate::util::time::Timer;
use crate::world::{MeshRegistry, SpatialPartition, World};

use super::shutdown_signal;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Server traffic is not throttled like player input.
const SERVER_MESSAGE_RATE_LIMIT: u32 = 10_000;

/// Connect, join and play with wandering input until shutdown, the frame
/// limit, or the server hanging up.
pub async fn run_client(config: ClientConfig) -> anyhow::Result<()> {
    let settings = config.settings.clone();
    let stream = connect(config.server_addr, CONNECT_TIMEOUT)
        .await
        .with_context(|| format!("Failed to connect to {}", config.server_addr))?;
    info!(server = %config.server_addr, "Connected");

    let link = spawn_link(
        0,
        stream,
        LinkOptions {
            in_channel_capacity: settings.in_channel_capacity,
            rate_limit: SERVER_MESSAGE_RATE_LIMIT,
        },
    );
    let world = World::new(
        Arc::new(MeshRegistry::with_builtins()),
        SpatialPartition::new(settings.partition_count, settings.partition_dimension),
    );
    let input = Box::new(WanderInput::new(settings.seed));
    let mut client = Client::new(ClientState::new(link, world, settings.clone(), input));

    let step = Duration::from_secs_f64(settings.ms_per_command_frame.max(1.0) / 1000.0);
    let mut tick_interval = tokio::time::interval(step);
    tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut timer = Timer::new();
    let mut frames: u64 = 0;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tick_interval.tick() => {
                frames += u64::from(client.tick(timer.lap_ms()));
                if client.state.disconnected {
                    anyhow::bail!("Server closed the connection after {frames} frames");
                }
                if config.frames.is_some_and(|limit| frames >= limit) {
                    break;
                }
            }
        }
    }

    info!(
        frames,
        player_id = ?client.state.player_id,
        rtt_ms = ?client.state.last_rtt_ms,
        "Client stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationSettings;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn unreachable_server_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let config = ClientConfig {
            server_addr: addr,
            frames: Some(1),
            log_level: "info".into(),
            settings: SimulationSettings::default(),
        };
        assert!(run_client(config).await.is_err());
    }
}
