//! Configuration module - command line, environment and settings file

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::math::Vec3;
use crate::navmesh::NavMeshSettings;
use crate::physics::PhysicsSettings;

/// Default game port.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:7878";

/// Authoritative simulation server
#[derive(Debug, Clone, Parser)]
#[command(name = "simcore-server", version)]
pub struct ServerArgs {
    /// Project name reported to joining clients
    #[arg(long)]
    pub project: String,

    /// World document to load at startup
    #[arg(long)]
    pub world_file: Option<PathBuf>,

    /// Game socket address (falls back to LISTEN_ADDR)
    #[arg(long)]
    pub listen: Option<String>,

    /// Serve GET /health on this address (falls back to STATUS_ADDR)
    #[arg(long)]
    pub status_addr: Option<String>,

    /// JSON file overriding simulation settings
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// JSON mesh file registered alongside the built-in meshes
    #[arg(long)]
    pub mesh_file: Option<PathBuf>,

    /// Build a navigation mesh over the loaded world at startup
    #[arg(long)]
    pub bake_navmesh: bool,

    /// Write the world back to --world-file on shutdown
    #[arg(long)]
    pub save_on_exit: bool,

    /// Log filter when RUST_LOG is unset (falls back to LOG_LEVEL)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Headless simulation client
#[derive(Debug, Clone, Parser)]
#[command(name = "simcore-client", version)]
pub struct ClientArgs {
    /// Server address (falls back to SERVER_ADDR)
    #[arg(long)]
    pub server: Option<String>,

    /// Stop after this many command frames
    #[arg(long)]
    pub frames: Option<u64>,

    /// JSON file overriding simulation settings
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (falls back to LOG_LEVEL)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Avatar built for each joining player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarSettings {
    pub radius: f64,
    pub length: f64,
    pub speed: f64,
    pub fly_speed: f64,
    /// Camera position relative to the avatar.
    pub camera_offset: Vec3,
}

impl Default for AvatarSettings {
    fn default() -> Self {
        Self {
            radius: 40.0,
            length: 80.0,
            speed: 500.0,
            fly_speed: 1000.0,
            camera_offset: Vec3::new(0.0, 200.0, 400.0),
        }
    }
}

/// Simulation tuning, shared by server and client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub ms_per_command_frame: f64,
    pub ms_per_game_state_update: f64,
    /// Spike guard: frames run per outer tick before the backlog is dropped.
    pub max_command_frames_per_loop: u32,
    /// Seed for AI randomness.
    pub seed: u64,
    /// Kinematic entities below this height are respawned.
    pub kill_plane_y: f64,
    pub partition_count: usize,
    pub partition_dimension: f64,
    pub ping_interval_ms: f64,
    pub max_state_buffer_size: usize,
    pub max_command_frame_buffer_size: usize,
    /// Interpolation frames the client keeps buffered before catching up.
    pub interpolation_delay_frames: usize,
    pub in_channel_capacity: usize,
    /// Inbound messages per second per player.
    pub input_rate_limit: u32,
    pub avatar: AvatarSettings,
    pub physics: PhysicsSettings,
    pub navmesh: NavMeshSettings,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            ms_per_command_frame: 16.0,
            ms_per_game_state_update: 50.0,
            max_command_frames_per_loop: 8,
            seed: 0,
            kill_plane_y: -5000.0,
            partition_count: 32,
            partition_dimension: 500.0,
            ping_interval_ms: 1000.0,
            max_state_buffer_size: 256,
            max_command_frame_buffer_size: 256,
            interpolation_delay_frames: 8,
            in_channel_capacity: 256,
            input_rate_limit: 120,
            avatar: AvatarSettings::default(),
            physics: PhysicsSettings::default(),
            navmesh: NavMeshSettings::default(),
        }
    }
}

impl SimulationSettings {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Settings from `path` if given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        path.map(Self::from_file).unwrap_or_else(|| Ok(Self::default()))
    }
}

/// Server configuration after merging flags, environment and settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub project: String,
    pub world_file: Option<PathBuf>,
    pub listen_addr: SocketAddr,
    pub status_addr: Option<SocketAddr>,
    pub mesh_file: Option<PathBuf>,
    pub bake_navmesh: bool,
    pub save_on_exit: bool,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub settings: SimulationSettings,
}

impl ServerConfig {
    pub fn from_args(args: ServerArgs) -> Result<Self, ConfigError> {
        let listen = args
            .listen
            .or_else(|| env::var("LISTEN_ADDR").ok())
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let status = args.status_addr.or_else(|| env::var("STATUS_ADDR").ok());

        Ok(Self {
            project: args.project,
            world_file: args.world_file,
            listen_addr: parse_addr(&listen)?,
            status_addr: status.as_deref().map(parse_addr).transpose()?,
            mesh_file: args.mesh_file,
            bake_navmesh: args.bake_navmesh,
            save_on_exit: args.save_on_exit,
            log_level: log_level(args.log_level),
            settings: SimulationSettings::load(args.settings.as_deref())?,
        })
    }
}

/// Client configuration after merging flags, environment and settings.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub frames: Option<u64>,
    pub log_level: String,
    pub settings: SimulationSettings,
}

impl ClientConfig {
    pub fn from_args(args: ClientArgs) -> Result<Self, ConfigError> {
        let server = args
            .server
            .or_else(|| env::var("SERVER_ADDR").ok())
            .unwrap_or_else(|| "127.0.0.1:7878".to_string());
        Ok(Self {
            server_addr: parse_addr(&server)?,
            frames: args.frames,
            log_level: log_level(args.log_level),
            settings: SimulationSettings::load(args.settings.as_deref())?,
        })
    }
}

fn log_level(flag: Option<String>) -> String {
    flag.or_else(|| env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string())
}

fn parse_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(value.to_string()))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid socket address: {0}")]
    InvalidAddress(String),

    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file: {0}")]
    Format(#[from] serde_json::Error),
}
