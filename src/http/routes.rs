//! HTTP route definitions for the status endpoint

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::app::{AppState, PlayerStatus};
use crate::util::time::uptime_secs;

/// Build the status router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/players", get(players_handler))
        .route("/players/:player_id", get(player_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    project: String,
    uptime_secs: u64,
    command_frame: u32,
    entity_count: usize,
    connected_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        project: state.config.project.clone(),
        uptime_secs: uptime_secs(),
        command_frame: state.status.command_frame(),
        entity_count: state.status.entity_count(),
        connected_players: state.status.player_count(),
    })
}

// ============================================================================
// Player endpoints
// ============================================================================

async fn players_handler(State(state): State<AppState>) -> Json<Vec<PlayerStatus>> {
    Json(state.status.players())
}

async fn player_handler(
    State(state): State<AppState>,
    Path(player_id): Path<u32>,
) -> Result<Json<PlayerStatus>, AppError> {
    state
        .status
        .players()
        .into_iter()
        .find(|p| p.player_id == player_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("player {player_id}")))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, SimulationSettings};
    use crate::game::ServerState;
    use crate::net::PlayerLink;
    use crate::world::World;

    fn app_state() -> AppState {
        AppState::new(ServerConfig {
            project: "demo".into(),
            world_file: None,
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            status_addr: None,
            mesh_file: None,
            bake_navmesh: false,
            save_on_exit: false,
            log_level: "info".into(),
            settings: SimulationSettings::default(),
        })
    }

    #[tokio::test]
    async fn health_reports_published_counters() {
        let state = app_state();
        let mut server = ServerState::new("demo", World::default(), SimulationSettings::default());
        let (link, _, _) = PlayerLink::detached(100_000, 1);
        server.connect(link);
        state.status.publish(&server);

        let Json(health) = health_handler(State(state)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.project, "demo");
        assert_eq!(health.connected_players, 1);
    }

    #[tokio::test]
    async fn unknown_player_is_not_found() {
        let state = app_state();
        let response = player_handler(State(state), Path(5)).await.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
