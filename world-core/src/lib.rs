//! Tile World - Core Library
//!
//! Deterministic world-state store and per-client sync engine for a
//! multiplayer tile-world server:
//! - Layered map storage (dense chunks, sparse operation logs)
//! - Map tree composition, merge and change notification
//! - Auto-tiling transitions resolved at view time
//! - Scoped views materialized per viewer and network window
//! - Tag-based sight/collision visibility
//! - Per-connection interest management (windows and entities)
//! - Length-prefixed wire envelope
//!
//! Nothing here does I/O or spawns threads except the rayon pool used for
//! batch view materialization.

pub mod config;
pub mod constants;
pub mod coords;
pub mod entity;
pub mod error;
pub mod layer;
pub mod logging;
pub mod registry;
pub mod sync;
pub mod transition;
pub mod tree;
pub mod view;
pub mod viewer;
pub mod wire;
pub mod world;

pub use error::{WireError, WorldError, WorldResult};
pub use world::{DimensionId, WorldState};
