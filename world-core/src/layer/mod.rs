//! Map Layers
//!
//! Per-layer tile storage strategies sharing one interface:
//! - `DenseLayer`: one structural tile id per cell, fixed 64×64 chunks
//! - `SparseLayer`: ordered operation list per coordinate (stacking overlays)
//! - `EmptyLayer`: placeholder, every mutation is a no-op
//! - `DefaultLayer`: borrowed composite of the base dense layer and the
//!   default sparse layer ("one structural tile + many decorations")
//!
//! Variants form a closed set, so dispatch is a `match` over `LayerStorage`.
//! Mutations return `bool`: `false` is an expected no-op, never an error.

mod dense;
mod sparse;

pub use dense::{DenseChunk, DenseLayer};
pub use sparse::{SparseChunk, SparseLayer};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::constants::EMPTY_TILE;
use crate::coords::{ChunkWindow, Coordinate};
use crate::viewer::{TagSet, Tagged};

/// Registry-assigned tile id; `0` is the empty cell
pub type TileId = u32;

/// Per-cell annotation table
pub type Annotations = BTreeMap<String, Value>;

// ============================================================================
// Operations & resolved stacks
// ============================================================================

/// One recorded sparse-layer mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TileOperation {
    Placement { tile: TileId },
    Replacement { tile: TileId },
    Removal { tile: TileId },
    Annotation { key: String, data: Value },
}

/// Resolved tiles at one coordinate: a structural base plus an ordered
/// overlay queue. The overlay list is popped from the front when the base
/// is removed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TileStack {
    pub base: TileId,
    pub additional: Vec<TileId>,
}

impl TileStack {
    pub fn new(base: TileId, additional: Vec<TileId>) -> Self {
        Self { base, additional }
    }

    pub fn is_empty(&self) -> bool {
        self.base == EMPTY_TILE && self.additional.is_empty()
    }

    /// True if `tile` is the base or any overlay
    pub fn contains(&self, tile: TileId) -> bool {
        tile != EMPTY_TILE && (self.base == tile || self.additional.contains(&tile))
    }

    /// Replay a single operation. Annotations do not touch the stack.
    pub fn apply(&mut self, operation: &TileOperation) {
        match operation {
            TileOperation::Placement { tile } => {
                if self.base == EMPTY_TILE {
                    self.base = *tile;
                } else {
                    self.additional.push(*tile);
                }
            }
            TileOperation::Replacement { tile } => {
                self.additional.clear();
                self.base = *tile;
            }
            TileOperation::Removal { tile } => {
                if self.base == *tile && *tile != EMPTY_TILE {
                    self.base = if self.additional.is_empty() {
                        EMPTY_TILE
                    } else {
                        self.additional.remove(0)
                    };
                } else if let Some(pos) = self.additional.iter().position(|t| t == tile) {
                    self.additional.remove(pos);
                }
            }
            TileOperation::Annotation { .. } => {}
        }
    }

    /// Every tile id in render order, base first
    pub fn iter(&self) -> impl Iterator<Item = TileId> + '_ {
        std::iter::once(self.base)
            .filter(|t| *t != EMPTY_TILE)
            .chain(self.additional.iter().copied())
    }
}

// ============================================================================
// Empty layer
// ============================================================================

/// Layer that stores nothing; used as the base of sparse-only trees
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyLayer;

// ============================================================================
// MapLayer
// ============================================================================

/// Storage strategy of a layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerStorage {
    Dense(DenseLayer),
    Sparse(SparseLayer),
    Empty(EmptyLayer),
}

/// Named layer with visibility and collision tagging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapLayer {
    name: String,
    #[serde(default)]
    visibility_tags: TagSet,
    #[serde(default)]
    collision_tags: TagSet,
    storage: LayerStorage,
}

impl MapLayer {
    pub fn new(name: impl Into<String>, storage: LayerStorage) -> Self {
        Self {
            name: name.into(),
            visibility_tags: TagSet::default(),
            collision_tags: TagSet::default(),
            storage,
        }
    }

    pub fn dense(name: impl Into<String>) -> Self {
        Self::new(name, LayerStorage::Dense(DenseLayer::default()))
    }

    pub fn sparse(name: impl Into<String>) -> Self {
        Self::new(name, LayerStorage::Sparse(SparseLayer::default()))
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, LayerStorage::Empty(EmptyLayer))
    }

    pub fn with_visibility_tags(mut self, tags: TagSet) -> Self {
        self.visibility_tags = tags;
        self
    }

    pub fn with_collision_tags(mut self, tags: TagSet) -> Self {
        self.collision_tags = tags;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &LayerStorage {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut LayerStorage {
        &mut self.storage
    }

    /// Same name, tags and storage kind, no contents
    pub fn empty_like(&self) -> MapLayer {
        let storage = match &self.storage {
            LayerStorage::Dense(_) => LayerStorage::Dense(DenseLayer::default()),
            LayerStorage::Sparse(_) => LayerStorage::Sparse(SparseLayer::default()),
            LayerStorage::Empty(_) => LayerStorage::Empty(EmptyLayer),
        };
        MapLayer {
            name: self.name.clone(),
            visibility_tags: self.visibility_tags.clone(),
            collision_tags: self.collision_tags.clone(),
            storage,
        }
    }

    pub fn visibility_tags_mut(&mut self) -> &mut TagSet {
        &mut self.visibility_tags
    }

    pub fn collision_tags_mut(&mut self) -> &mut TagSet {
        &mut self.collision_tags
    }

    pub fn is_dense(&self) -> bool {
        matches!(self.storage, LayerStorage::Dense(_))
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.storage, LayerStorage::Sparse(_))
    }

    /// Dense or empty storage can serve as a tree's base layer
    pub fn is_base_capable(&self) -> bool {
        !self.is_sparse()
    }

    // --- mutations ---

    /// Dense: only into an empty cell. Sparse: always stacks.
    pub fn place_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        match &mut self.storage {
            LayerStorage::Dense(layer) => layer.place_tile(coordinate, tile),
            LayerStorage::Sparse(layer) => layer.place_tile(coordinate, tile),
            LayerStorage::Empty(_) => false,
        }
    }

    /// Unconditional overwrite of the structural tile
    pub fn replace_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        match &mut self.storage {
            LayerStorage::Dense(layer) => layer.replace_tile(coordinate, tile),
            LayerStorage::Sparse(layer) => layer.replace_tile(coordinate, tile),
            LayerStorage::Empty(_) => false,
        }
    }

    /// Only succeeds when `tile` is currently resolved at the coordinate
    pub fn remove_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        match &mut self.storage {
            LayerStorage::Dense(layer) => layer.remove_tile(coordinate, tile),
            LayerStorage::Sparse(layer) => layer.remove_tile(coordinate, tile),
            LayerStorage::Empty(_) => false,
        }
    }

    pub fn reset_tile(&mut self, coordinate: Coordinate) -> bool {
        match &mut self.storage {
            LayerStorage::Dense(layer) => layer.reset_tile(coordinate),
            LayerStorage::Sparse(layer) => layer.reset_tile(coordinate),
            LayerStorage::Empty(_) => false,
        }
    }

    pub fn annotate_tile(&mut self, coordinate: Coordinate, key: &str, data: Value) -> bool {
        match &mut self.storage {
            LayerStorage::Dense(layer) => layer.annotate_tile(coordinate, key, data),
            LayerStorage::Sparse(layer) => layer.annotate_tile(coordinate, key, data),
            LayerStorage::Empty(_) => false,
        }
    }

    // --- queries ---

    /// Resolved structural tile of this layer alone
    pub fn tile_id(&self, coordinate: Coordinate) -> TileId {
        match &self.storage {
            LayerStorage::Dense(layer) => layer.tile_id(coordinate),
            LayerStorage::Sparse(layer) => layer.resolved_stack(coordinate).base,
            LayerStorage::Empty(_) => EMPTY_TILE,
        }
    }

    /// Resolved stack of this layer alone
    pub fn resolved_stack(&self, coordinate: Coordinate) -> TileStack {
        let mut stack = TileStack::default();
        self.apply_to(coordinate, &mut stack);
        stack
    }

    /// Layer this layer's contribution at `coordinate` on top of `stack`
    pub fn apply_to(&self, coordinate: Coordinate, stack: &mut TileStack) {
        match &self.storage {
            LayerStorage::Dense(layer) => {
                let tile = layer.tile_id(coordinate);
                if tile != EMPTY_TILE {
                    stack.base = tile;
                }
            }
            LayerStorage::Sparse(layer) => {
                for operation in layer.operations(coordinate) {
                    stack.apply(operation);
                }
            }
            LayerStorage::Empty(_) => {}
        }
    }

    pub fn annotations(&self, coordinate: Coordinate) -> Annotations {
        match &self.storage {
            LayerStorage::Dense(layer) => layer.annotations(coordinate).cloned().unwrap_or_default(),
            LayerStorage::Sparse(layer) => layer.annotations(coordinate),
            LayerStorage::Empty(_) => Annotations::new(),
        }
    }

    /// Coordinates holding any state inside `window` grown by `padding`
    pub fn populated_in(&self, window: &ChunkWindow, padding: i32) -> Vec<Coordinate> {
        match &self.storage {
            LayerStorage::Dense(layer) => layer.populated_in(window, padding),
            LayerStorage::Sparse(layer) => layer.coordinates_in(window, padding),
            LayerStorage::Empty(_) => Vec::new(),
        }
    }
}

impl Tagged for MapLayer {
    fn visibility_tags(&self) -> &TagSet {
        &self.visibility_tags
    }

    fn collision_tags(&self) -> &TagSet {
        &self.collision_tags
    }
}

// ============================================================================
// DefaultLayer composite
// ============================================================================

/// Mutation surface shared by concrete layers and the default composite
pub trait TileMutator {
    fn place_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool;
    fn replace_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool;
    fn remove_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool;
    fn reset_tile(&mut self, coordinate: Coordinate) -> bool;
    fn annotate_tile(&mut self, coordinate: Coordinate, key: &str, data: Value) -> bool;
}

impl TileMutator for MapLayer {
    fn place_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        MapLayer::place_tile(self, coordinate, tile)
    }

    fn replace_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        MapLayer::replace_tile(self, coordinate, tile)
    }

    fn remove_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        MapLayer::remove_tile(self, coordinate, tile)
    }

    fn reset_tile(&mut self, coordinate: Coordinate) -> bool {
        MapLayer::reset_tile(self, coordinate)
    }

    fn annotate_tile(&mut self, coordinate: Coordinate, key: &str, data: Value) -> bool {
        MapLayer::annotate_tile(self, coordinate, key, data)
    }
}

/// Short-lived composite over the base layer and the default sparse layer.
///
/// Placement, replacement and removal go to the base first and fall back to
/// the sparse layer when the base reports `false`.
pub struct DefaultLayer<'a> {
    base: &'a mut MapLayer,
    sparse: &'a mut MapLayer,
}

impl<'a> DefaultLayer<'a> {
    pub fn new(base: &'a mut MapLayer, sparse: &'a mut MapLayer) -> Self {
        Self { base, sparse }
    }
}

impl TileMutator for DefaultLayer<'_> {
    fn place_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        self.base.place_tile(coordinate, tile) || self.sparse.place_tile(coordinate, tile)
    }

    fn replace_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        self.base.replace_tile(coordinate, tile) || self.sparse.replace_tile(coordinate, tile)
    }

    fn remove_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        self.base.remove_tile(coordinate, tile) || self.sparse.remove_tile(coordinate, tile)
    }

    /// Clears both halves
    fn reset_tile(&mut self, coordinate: Coordinate) -> bool {
        let base = self.base.reset_tile(coordinate);
        let sparse = self.sparse.reset_tile(coordinate);
        base || sparse
    }

    /// Always lands in the sparse half
    fn annotate_tile(&mut self, coordinate: Coordinate, key: &str, data: Value) -> bool {
        self.sparse.annotate_tile(coordinate, key, data)
    }
}
