//! Server runtime: socket accept, status endpoint and the frame loop

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::collider::Aabb;
use crate::config::ServerConfig;
use crate::game::{Server, ServerState};
use crate::http::build_router;
use crate::math::Vec3;
use crate::navmesh::bake_world;
use crate::net::{accept_loop, LinkOptions, PlayerLink};
use crate::store::{load_world, save_world};
use crate::util::time::{init_server_time, Timer};
use crate::world::mesh::GROUND_MESH;
use crate::world::{Entity, MeshComponent, MeshRegistry, SpatialPartition, World};

use super::{shutdown_signal, AppState};

/// A bound server, ready to run.
pub struct ServerRuntime {
    config: ServerConfig,
    listener: TcpListener,
    status_listener: Option<TcpListener>,
    server: Server,
}

impl ServerRuntime {
    /// Load the world and bind both sockets. Fails if either address is
    /// unavailable.
    pub async fn bind(config: ServerConfig) -> anyhow::Result<Self> {
        init_server_time();
        let mut world = load_initial_world(&config)?;

        if config.bake_navmesh {
            let mut bounds = static_bounds(&mut world);
            bounds.max.y += config.settings.navmesh.walkable_height;
            let navmesh = bake_world(&mut world, &bounds, &config.settings.navmesh);
            info!(
                regions = navmesh.region_count,
                contours = navmesh.contours.len(),
                "Baked navigation mesh"
            );
        }

        let listener = TcpListener::bind(config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
        let status_listener = match config.status_addr {
            Some(addr) => Some(
                TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("Failed to bind status address {addr}"))?,
            ),
            None => None,
        };

        let state = ServerState::new(config.project.clone(), world, config.settings.clone())
            .with_world_file(config.world_file.clone());
        Ok(Self {
            server: Server::new(state),
            config,
            listener,
            status_listener,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            listener,
            status_listener,
            mut server,
        } = self;
        let settings = &config.settings;
        info!(addr = %listener.local_addr()?, project = %config.project, "Server listening");

        let (link_tx, mut link_rx) = mpsc::unbounded_channel::<PlayerLink>();
        let options = LinkOptions {
            in_channel_capacity: settings.in_channel_capacity,
            rate_limit: settings.input_rate_limit,
        };
        tokio::spawn(accept_loop(listener, link_tx, options));

        let app_state = AppState::new(config.clone());
        if let Some(status_listener) = status_listener {
            info!(addr = %status_listener.local_addr()?, "Status endpoint listening");
            let router = build_router(app_state.clone());
            tokio::spawn(async move {
                if let Err(e) = axum::serve(status_listener, router).await {
                    error!(error = %e, "Status endpoint stopped");
                }
            });
        }

        let step = Duration::from_secs_f64(settings.ms_per_command_frame.max(1.0) / 1000.0);
        let mut tick_interval = tokio::time::interval(step);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut timer = Timer::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tick_interval.tick() => {
                    while let Ok(link) = link_rx.try_recv() {
                        server.state.connect(link);
                    }
                    if server.tick(timer.lap_ms()) > 0 {
                        app_state.status.publish(&server.state);
                    }
                }
            }
        }

        if config.save_on_exit {
            save_on_exit(&mut server, &config)?;
        }
        info!(frames = server.state.command_frame(), "Server stopped");
        Ok(())
    }
}

/// Bind, run until Ctrl+C or SIGTERM, then shut down.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    ServerRuntime::bind(config).await?.run(shutdown_signal()).await
}

fn load_initial_world(config: &ServerConfig) -> anyhow::Result<World> {
    let settings = &config.settings;
    let mut meshes = MeshRegistry::with_builtins();
    if let Some(path) = &config.mesh_file {
        let count = meshes
            .load_file(path)
            .with_context(|| format!("Failed to load meshes from {}", path.display()))?;
        info!(path = %path.display(), count, "Registered meshes");
    }
    let meshes = Arc::new(meshes);
    let spatial = SpatialPartition::new(settings.partition_count, settings.partition_dimension);

    match &config.world_file {
        Some(path) if path.exists() => Ok(load_world(path, meshes, spatial)?),
        Some(path) => {
            warn!(path = %path.display(), "World file not found, starting from the default world");
            Ok(default_world(meshes, spatial)?)
        }
        None => Ok(default_world(meshes, spatial)?),
    }
}

/// A flat ground plane with a spawn point at the origin.
pub fn default_world(meshes: Arc<MeshRegistry>, spatial: SpatialPartition) -> Result<World, crate::world::WorldError> {
    let mut world = World::new(meshes, spatial);
    world.spawn(
        Entity::new("ground")
            .with_mesh(MeshComponent::new(GROUND_MESH))
            .as_static(),
    )?;
    world.spawn(Entity::new("spawn").with_position(Vec3::ZERO).with_spawn_point())?;
    Ok(world)
}

/// Union of every static entity's bounding box.
fn static_bounds(world: &mut World) -> Aabb {
    let ids: Vec<_> = world.iter().filter(|e| e.is_static).map(|e| e.id).collect();
    ids.into_iter()
        .filter_map(|id| world.bounding_box(id))
        .reduce(|a, b| a.union(&b))
        .unwrap_or_else(|| Aabb::new(Vec3::ZERO, Vec3::ZERO))
}

/// Player entities are transient and are not written back.
fn save_on_exit(server: &mut Server, config: &ServerConfig) -> anyhow::Result<()> {
    let Some(path) = &config.world_file else {
        warn!("--save-on-exit without --world-file, nothing saved");
        return Ok(());
    };
    let transient: Vec<_> = server
        .state
        .players
        .values()
        .flat_map(|s| [s.avatar, s.camera])
        .flatten()
        .collect();
    for id in transient {
        server.state.world.delete_entity(id);
    }
    save_world(&server.state.world, path)?;
    Ok(())
}
