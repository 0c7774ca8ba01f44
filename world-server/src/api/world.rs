//! World endpoints
//!
//! - GET  /world                       (reads the tick snapshot)
//! - POST /world/place_tile
//! - POST /world/remove_tile
//! - POST /world/layer_visibility
//! - POST /world/spawn_entity
//! - POST /world/teleport_entity

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::oneshot;

use world_core::coords::Coordinate;
use world_core::constants::DEFAULT_LAYER;

use super::ApiState;
use crate::bridge::{CommandResult, ServerCommand, SpawnResult, WorldSnapshot};

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/world", get(get_world))
        .route("/world/place_tile", post(place_tile))
        .route("/world/remove_tile", post(remove_tile))
        .route("/world/layer_visibility", post(layer_visibility))
        .route("/world/spawn_entity", post(spawn_entity))
        .route("/world/teleport_entity", post(teleport_entity))
}

// ============================================================================
// Request Types
// ============================================================================

fn default_layer() -> String {
    DEFAULT_LAYER.to_string()
}

#[derive(Deserialize)]
pub struct TileRequest {
    pub dimension: String,
    pub coordinate: Coordinate,
    pub tile: String,
    #[serde(default = "default_layer")]
    pub layer: String,
}

#[derive(Deserialize)]
pub struct LayerVisibilityRequest {
    pub dimension: String,
    #[serde(default = "default_layer")]
    pub layer: String,
    pub tag: String,
    pub enabled: bool,
}

#[derive(Deserialize)]
pub struct SpawnRequest {
    pub dimension: String,
    pub name: String,
    pub coordinate: Coordinate,
}

#[derive(Deserialize)]
pub struct TeleportRequest {
    pub network_id: u32,
    pub coordinate: Coordinate,
}

// ============================================================================
// Handlers
// ============================================================================

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Send a command built around a fresh reply channel and wait for the tick
async fn round_trip<T>(state: &ApiState, build: impl FnOnce(oneshot::Sender<T>) -> ServerCommand) -> ApiResult<T> {
    let (reply, response) = oneshot::channel();
    state
        .commands
        .send(build(reply))
        .map_err(|_| (StatusCode::SERVICE_UNAVAILABLE, "tick loop is not running".to_string()))?;
    response
        .await
        .map(Json)
        .map_err(|_| (StatusCode::SERVICE_UNAVAILABLE, "command dropped".to_string()))
}

async fn get_world(State(state): State<ApiState>) -> Json<WorldSnapshot> {
    let snap = state
        .world_snapshot
        .read()
        .map(|s| s.clone())
        .unwrap_or_default();
    Json(snap)
}

async fn place_tile(State(state): State<ApiState>, Json(req): Json<TileRequest>) -> ApiResult<CommandResult> {
    round_trip(&state, |reply| ServerCommand::PlaceTile {
        dimension: req.dimension,
        coordinate: req.coordinate,
        tile: req.tile,
        layer: req.layer,
        reply,
    })
    .await
}

async fn remove_tile(State(state): State<ApiState>, Json(req): Json<TileRequest>) -> ApiResult<CommandResult> {
    round_trip(&state, |reply| ServerCommand::RemoveTile {
        dimension: req.dimension,
        coordinate: req.coordinate,
        tile: req.tile,
        layer: req.layer,
        reply,
    })
    .await
}

async fn layer_visibility(
    State(state): State<ApiState>,
    Json(req): Json<LayerVisibilityRequest>,
) -> ApiResult<CommandResult> {
    round_trip(&state, |reply| ServerCommand::SetLayerVisibility {
        dimension: req.dimension,
        layer: req.layer,
        tag: req.tag,
        enabled: req.enabled,
        reply,
    })
    .await
}

async fn spawn_entity(State(state): State<ApiState>, Json(req): Json<SpawnRequest>) -> ApiResult<SpawnResult> {
    round_trip(&state, |reply| ServerCommand::SpawnEntity {
        dimension: req.dimension,
        name: req.name,
        coordinate: req.coordinate,
        reply,
    })
    .await
}

async fn teleport_entity(State(state): State<ApiState>, Json(req): Json<TeleportRequest>) -> ApiResult<CommandResult> {
    round_trip(&state, |reply| ServerCommand::TeleportEntity {
        network_id: req.network_id,
        coordinate: req.coordinate,
        reply,
    })
    .await
}
