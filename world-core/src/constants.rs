//! Centralized constants for the tile world core.
//!
//! Storage chunking and network windowing use distinct sizes; both live here so
//! layers, views and sync agree on them.

use crate::layer::TileId;

// =====================================================
// Spatial
// =====================================================

/// Edge length of a storage chunk (dense and sparse layers)
pub const MAP_CHUNK_SIZE: i32 = 64;

/// Edge length of a network sync window
pub const SYNC_CHUNK_SIZE: i32 = 16;

/// Border ring materialized around every view for neighbour lookups
pub const VIEW_PADDING: i32 = 1;

// =====================================================
// Tiles & Layers
// =====================================================

/// Tile id stored in an empty cell
pub const EMPTY_TILE: TileId = 0;

/// Tag every layer, viewer and entity carries unless configured otherwise
pub const DEFAULT_TAG: &str = "default";

/// Logical name of the base dense + default sparse composite
pub const DEFAULT_LAYER: &str = "default";

// =====================================================
// Wire
// =====================================================

/// Largest payload a single frame may carry (2-byte signed length prefix)
pub const MAX_FRAME_PAYLOAD: usize = 32767;

/// Size of the frame length prefix in bytes
pub const FRAME_HEADER_LEN: usize = 2;

// =====================================================
// Sync defaults
// =====================================================

/// Default horizontal sync range, in windows around the camera window
pub const DEFAULT_SYNC_RANGE: i32 = 2;

/// Default vertical sync range, in z levels around the camera
pub const DEFAULT_SYNC_VERTICAL_RANGE: i32 = 1;

/// Default duration of a one-step entity move, in seconds
pub const DEFAULT_MOVE_DURATION_SECS: f32 = 0.25;
