//! Admin HTTP API
//!
//! JSON endpoints for operators and external scripting hosts. Reads come
//! from the per-tick `WorldSnapshot`; writes cross the tick bridge as
//! `ServerCommand`s and wait on a oneshot reply.
//!
//! ## Architecture
//! ```text
//! Admin client
//!       ↓ HTTP, JSON body
//! Axum Router
//!       ↓
//! ServerCommand → tick → oneshot reply
//! ```

pub mod world;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bridge::{CommandSender, SharedWorldSnapshot};
use crate::metrics::ServerMetrics;

/// Shared state available to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Channel to the tick (write operations)
    pub commands: CommandSender,
    /// Snapshot of the live world (read operations)
    pub world_snapshot: SharedWorldSnapshot,
    pub metrics: Arc<ServerMetrics>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(crate::metrics::prometheus_handler))
        .route("/metrics/json", get(crate::metrics::json_metrics_handler))
        .merge(world::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on an already bound listener
pub async fn start_api_server(listener: tokio::net::TcpListener, state: ApiState) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "Admin API listening");
    axum::serve(listener, build_router(state)).await
}
