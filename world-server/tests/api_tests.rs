//! Admin API Tests
//!
//! Drives the router with `tower::ServiceExt::oneshot`. Mutating endpoints are
//! answered by a stand-in tick task that runs `execute_command` on a real
//! `WorldState`, so replies carry genuine world outcomes.

use axum::body::Body;
use http::Request;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use tile_world_server::api::{self, ApiState};
use tile_world_server::bridge::{self, BridgeSettings, ConnectionEntities, DimensionSnapshot};
use tile_world_server::content::builtin_registries;
use tile_world_server::metrics::ServerMetrics;
use world_core::config::WorldConfig;
use world_core::coords::Coordinate;
use world_core::tree::MapTree;
use world_core::WorldState;

/// Router plus a background task standing in for the Bevy tick
fn create_test_router() -> (axum::Router, ApiState) {
    let mut state = WorldState::new(Arc::new(builtin_registries()), WorldConfig::default());
    let overworld = state.create_dimension("overworld", MapTree::new()).unwrap();
    let (cmd_sender, mut cmd_receiver, world_snapshot) = bridge::create_bridge();
    let metrics = ServerMetrics::new();

    let settings = BridgeSettings {
        max_commands_per_tick: 64,
        spawn_dimension: overworld,
        spawn_point: Coordinate::new(0, 0, 0),
        player_entity: None,
    };
    let tick_metrics = metrics.clone();
    tokio::spawn(async move {
        let mut connections = ConnectionEntities::default();
        while let Some(command) = cmd_receiver.receiver.recv().await {
            bridge::execute_command(&mut state, &mut connections, &settings, &tick_metrics, command);
        }
    });

    let api_state = ApiState {
        commands: cmd_sender,
        world_snapshot,
        metrics,
    };
    (api::build_router(api_state.clone()), api_state)
}

async fn post_json(router: axum::Router, uri: &str, body: Value) -> (u16, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status().as_u16();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn get(router: axum::Router, uri: &str) -> (u16, Vec<u8>) {
    let req = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status().as_u16();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

// ============================================================================
// Health & Metrics
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (router, _state) = create_test_router();
    let (status, body) = get(router, "/health").await;
    assert_eq!(status, 200);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(!json["version"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_prometheus_metrics() {
    let (router, state) = create_test_router();
    state.metrics.record_connection_opened();
    state.metrics.record_decode_error();

    let (status, body) = get(router, "/metrics").await;
    assert_eq!(status, 200);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("tile_world_connections_active 1"));
    assert!(text.contains("tile_world_decode_errors_total 1"));
    assert!(text.contains("# TYPE tile_world_tick_total counter"));
}

#[tokio::test]
async fn test_json_metrics() {
    let (router, state) = create_test_router();
    state.metrics.record_outbound(12);

    let (status, body) = get(router, "/metrics/json").await;
    assert_eq!(status, 200);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["packets_out"], 1);
    assert_eq!(json["bytes_out"], 12);
}

// ============================================================================
// World
// ============================================================================

#[tokio::test]
async fn test_world_snapshot_endpoint() {
    let (router, state) = create_test_router();
    {
        let mut snap = state.world_snapshot.write().unwrap();
        snap.tick = 42;
        snap.players = 3;
        snap.dimensions.push(DimensionSnapshot {
            id: 0,
            name: "overworld".into(),
            watchers: 3,
            layers: vec!["default".into()],
        });
    }

    let (status, body) = get(router, "/world").await;
    assert_eq!(status, 200);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["tick"], 42);
    assert_eq!(json["players"], 3);
    assert_eq!(json["dimensions"][0]["name"], "overworld");
}

#[tokio::test]
async fn test_place_then_remove_tile() {
    let (router, _state) = create_test_router();
    let body = json!({
        "dimension": "overworld",
        "coordinate": {"x": 4, "y": -2, "z": 0},
        "tile": "stone"
    });

    // base cell, then an overlay on top of it
    for _ in 0..2 {
        let (status, json) = post_json(router.clone(), "/world/place_tile", body.clone()).await;
        assert_eq!(status, 200);
        assert_eq!(json["success"], true);
    }
    for _ in 0..2 {
        let (_, json) = post_json(router.clone(), "/world/remove_tile", body.clone()).await;
        assert_eq!(json["success"], true);
    }
    let (_, json) = post_json(router, "/world/remove_tile", body).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Tile not present");
}

#[tokio::test]
async fn test_unknown_names_are_reported() {
    let (router, _state) = create_test_router();
    let (status, json) = post_json(
        router.clone(),
        "/world/place_tile",
        json!({"dimension": "nether", "coordinate": {"x": 0, "y": 0, "z": 0}, "tile": "stone"}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["success"], false);
    assert!(json["message"].as_str().unwrap().contains("nether"));

    let (_, json) = post_json(
        router,
        "/world/place_tile",
        json!({"dimension": "overworld", "coordinate": {"x": 0, "y": 0, "z": 0}, "tile": "lava"}),
    )
    .await;
    assert_eq!(json["message"], "Unknown tile name: lava");
}

#[tokio::test]
async fn test_layer_visibility_toggle() {
    let (router, _state) = create_test_router();
    let (_, json) = post_json(
        router.clone(),
        "/world/place_tile",
        json!({"dimension": "overworld", "coordinate": {"x": 0, "y": 0, "z": 0}, "tile": "grass"}),
    )
    .await;
    assert_eq!(json["success"], true);

    let body = json!({"dimension": "overworld", "tag": "xray", "enabled": true});
    let (_, json) = post_json(router.clone(), "/world/layer_visibility", body.clone()).await;
    assert_eq!(json["success"], true);
    let (_, json) = post_json(router, "/world/layer_visibility", body).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Unchanged");
}

#[tokio::test]
async fn test_spawn_and_teleport_entity() {
    let (router, _state) = create_test_router();
    let (status, json) = post_json(
        router.clone(),
        "/world/spawn_entity",
        json!({"dimension": "overworld", "name": "player", "coordinate": {"x": 1, "y": 1, "z": 0}}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["success"], true);
    let network_id = json["network_id"].as_u64().unwrap();

    let (_, json) = post_json(
        router.clone(),
        "/world/teleport_entity",
        json!({"network_id": network_id, "coordinate": {"x": 90, "y": 90, "z": 0}}),
    )
    .await;
    assert_eq!(json["success"], true);

    let (_, json) = post_json(
        router,
        "/world/teleport_entity",
        json!({"network_id": 9999, "coordinate": {"x": 0, "y": 0, "z": 0}}),
    )
    .await;
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let (router, _state) = create_test_router();
    let (status, _) = post_json(router, "/world/place_tile", json!({"dimension": "overworld"})).await;
    assert_eq!(status, 422);
}

#[tokio::test]
async fn test_commands_fail_when_tick_is_gone() {
    let (cmd_sender, cmd_receiver, world_snapshot) = bridge::create_bridge();
    drop(cmd_receiver);
    let router = api::build_router(ApiState {
        commands: cmd_sender,
        world_snapshot,
        metrics: ServerMetrics::new(),
    });

    let (status, _) = post_json(
        router,
        "/world/spawn_entity",
        json!({"dimension": "overworld", "name": "player", "coordinate": {"x": 0, "y": 0, "z": 0}}),
    )
    .await;
    assert_eq!(status, 503);
}
