//! Application state shared with the status routes

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::ServerConfig;
use crate::game::ServerState;
use crate::world::EntityId;

/// What the status endpoint reports about one player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerStatus {
    pub player_id: u32,
    pub joined: bool,
    pub avatar: Option<EntityId>,
    pub last_input_command_frame: Option<u32>,
}

/// Counters published by the frame loop after each tick.
#[derive(Debug, Default)]
pub struct ServerStatus {
    command_frame: AtomicU32,
    entity_count: AtomicUsize,
    players: DashMap<u32, PlayerStatus>,
}

impl ServerStatus {
    pub fn publish(&self, state: &ServerState) {
        self.command_frame.store(state.command_frame(), Ordering::Relaxed);
        self.entity_count.store(state.world.len(), Ordering::Relaxed);
        self.players.retain(|id, _| state.players.contains_key(id));
        for (player_id, session) in &state.players {
            self.players.insert(
                *player_id,
                PlayerStatus {
                    player_id: *player_id,
                    joined: session.joined,
                    avatar: session.avatar,
                    last_input_command_frame: session.last_input_local_command_frame,
                },
            );
        }
    }

    pub fn command_frame(&self) -> u32 {
        self.command_frame.load(Ordering::Relaxed)
    }

    pub fn entity_count(&self) -> usize {
        self.entity_count.load(Ordering::Relaxed)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Players ordered by id.
    pub fn players(&self) -> Vec<PlayerStatus> {
        let mut players: Vec<PlayerStatus> = self.players.iter().map(|e| e.value().clone()).collect();
        players.sort_by_key(|p| p.player_id);
        players
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub status: Arc<ServerStatus>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            status: Arc::new(ServerStatus::default()),
        }
    }
}
