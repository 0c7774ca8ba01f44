//! Tile World Server Library
//!
//! Runtime around `world_core`:
//! - Framed TCP transport, one reader/writer task pair per connection
//! - Tick bridge: every world mutation runs inside the Bevy tick
//! - Admin HTTP API (health, metrics, scripting calls)
//! - Registry content loading

pub mod api; // Admin HTTP/JSON endpoints
pub mod bridge; // Transport/API ↔ tick communication
pub mod content; // Built-in and file-based registries
pub mod metrics; // Server metrics (Prometheus + JSON export)
pub mod net; // Framed TCP transport

pub use bridge::{create_bridge, BridgeSettings, ServerCommand};
pub use metrics::ServerMetrics;
