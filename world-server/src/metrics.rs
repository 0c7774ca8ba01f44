//! Server Metrics: transport and tick counters with Prometheus + JSON export
//!
//! Uses lock-free atomics for all counters; shared between the tokio
//! transport tasks, the Bevy tick and the admin API.
//!
//! ## Endpoints
//! - `GET /metrics`: Prometheus text format
//! - `GET /metrics/json`: JSON format

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::api::ApiState;

/// Shared metrics state (all lock-free atomics)
#[derive(Debug)]
pub struct ServerMetrics {
    pub connections_opened: AtomicU64,
    pub connections_closed: AtomicU64,
    /// Frames decoded from clients
    pub packets_in: AtomicU64,
    /// Frames written to clients
    pub packets_out: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    /// Packets queued for a connection whose writer already closed
    pub dropped_packets: AtomicU64,
    /// Malformed frames (each one closes its connection)
    pub decode_errors: AtomicU64,
    /// Bridge commands executed by the tick
    pub commands_processed: AtomicU64,
    /// Windows re-pushed by tick-end flushes
    pub windows_repushed: AtomicU64,
    pub ticks: AtomicU64,
    /// Server start time (for uptime calculation)
    pub start_time: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            packets_in: AtomicU64::new(0),
            packets_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            dropped_packets: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            commands_processed: AtomicU64::new(0),
            windows_repushed: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }
}

impl ServerMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_packet_in(&self) {
        self.packets_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outbound(&self, bytes: usize) {
        self.packets_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick(&self, commands: usize, windows: usize) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.commands_processed.fetch_add(commands as u64, Ordering::Relaxed);
        self.windows_repushed.fetch_add(windows as u64, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        let opened = self.connections_opened.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);
        opened.saturating_sub(closed)
    }

    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            active_connections: self.active_connections(),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            packets_in: self.packets_in.load(Ordering::Relaxed),
            packets_out: self.packets_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            dropped_packets: self.dropped_packets.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            commands_processed: self.commands_processed.load(Ordering::Relaxed),
            windows_repushed: self.windows_repushed.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub active_connections: u64,
    pub connections_opened: u64,
    pub packets_in: u64,
    pub packets_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub dropped_packets: u64,
    pub decode_errors: u64,
    pub commands_processed: u64,
    pub windows_repushed: u64,
    pub ticks: u64,
}

// ============================================================================
// GET /metrics: Prometheus text exposition format
// ============================================================================

pub async fn prometheus_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let m = state.metrics.snapshot();
    let body = format!(
        "# HELP tile_world_connections_active Currently open client connections\n\
         # TYPE tile_world_connections_active gauge\n\
         tile_world_connections_active {active}\n\
         \n\
         # HELP tile_world_packets_in_total Frames decoded from clients\n\
         # TYPE tile_world_packets_in_total counter\n\
         tile_world_packets_in_total {packets_in}\n\
         \n\
         # HELP tile_world_packets_out_total Frames written to clients\n\
         # TYPE tile_world_packets_out_total counter\n\
         tile_world_packets_out_total {packets_out}\n\
         \n\
         # HELP tile_world_bytes_out_total Bytes written to clients\n\
         # TYPE tile_world_bytes_out_total counter\n\
         tile_world_bytes_out_total {bytes_out}\n\
         \n\
         # HELP tile_world_dropped_packets_total Packets queued to closed connections\n\
         # TYPE tile_world_dropped_packets_total counter\n\
         tile_world_dropped_packets_total {dropped}\n\
         \n\
         # HELP tile_world_decode_errors_total Malformed client frames\n\
         # TYPE tile_world_decode_errors_total counter\n\
         tile_world_decode_errors_total {decode_errors}\n\
         \n\
         # HELP tile_world_tick_total Server ticks processed\n\
         # TYPE tile_world_tick_total counter\n\
         tile_world_tick_total {ticks}\n\
         \n\
         # HELP tile_world_uptime_seconds Server uptime\n\
         # TYPE tile_world_uptime_seconds gauge\n\
         tile_world_uptime_seconds {uptime:.2}\n",
        active = m.active_connections,
        packets_in = m.packets_in,
        packets_out = m.packets_out,
        bytes_out = m.bytes_out,
        dropped = m.dropped_packets,
        decode_errors = m.decode_errors,
        ticks = m.ticks,
        uptime = m.uptime_secs,
    );

    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

// ============================================================================
// GET /metrics/json
// ============================================================================

pub async fn json_metrics_handler(State(state): State<ApiState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
