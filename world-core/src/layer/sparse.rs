//! Sparse tile storage: an append-only operation list per coordinate.
//!
//! A coordinate with no operations is implicitly empty. The resolved tile
//! stack is obtained by replaying the list through `TileStack::apply`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::{Annotations, TileId, TileOperation, TileStack};
use crate::constants::{EMPTY_TILE, MAP_CHUNK_SIZE};
use crate::coords::{coordinate_map, ChunkWindow, Coordinate};

/// Operation lists for the coordinates of one 64×64 chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseChunk {
    #[serde(with = "coordinate_map")]
    operations: HashMap<Coordinate, Vec<TileOperation>>,
}

impl SparseChunk {
    pub fn operations(&self, coordinate: Coordinate) -> &[TileOperation] {
        self.operations
            .get(&coordinate)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn push(&mut self, coordinate: Coordinate, operation: TileOperation) {
        self.operations.entry(coordinate).or_default().push(operation);
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Coordinates and their operation lists, sorted by coordinate
    pub fn entries(&self) -> Vec<(Coordinate, &[TileOperation])> {
        let mut entries: Vec<_> = self
            .operations
            .iter()
            .map(|(coordinate, ops)| (*coordinate, ops.as_slice()))
            .collect();
        entries.sort_by_key(|(coordinate, _)| *coordinate);
        entries
    }
}

/// Chunked sparse layer; placements stack instead of failing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseLayer {
    #[serde(with = "coordinate_map")]
    chunks: HashMap<Coordinate, SparseChunk>,
}

impl SparseLayer {
    pub fn new() -> Self {
        Self::default()
    }

    fn chunk_mut(&mut self, coordinate: Coordinate) -> &mut SparseChunk {
        self.chunks
            .entry(coordinate.chunk_origin(MAP_CHUNK_SIZE))
            .or_default()
    }

    /// Append a raw operation (used by merge)
    pub fn push_operation(&mut self, coordinate: Coordinate, operation: TileOperation) {
        self.chunk_mut(coordinate).push(coordinate, operation);
    }

    pub fn place_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        if tile == EMPTY_TILE {
            return false;
        }
        self.push_operation(coordinate, TileOperation::Placement { tile });
        true
    }

    pub fn replace_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        self.push_operation(coordinate, TileOperation::Replacement { tile });
        true
    }

    /// Records a removal only if `tile` is somewhere in the resolved stack
    pub fn remove_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        if !self.resolved_stack(coordinate).contains(tile) {
            return false;
        }
        self.push_operation(coordinate, TileOperation::Removal { tile });
        true
    }

    /// Drops the whole operation list at `coordinate`
    pub fn reset_tile(&mut self, coordinate: Coordinate) -> bool {
        let origin = coordinate.chunk_origin(MAP_CHUNK_SIZE);
        let Some(chunk) = self.chunks.get_mut(&origin) else {
            return false;
        };
        let removed = chunk.operations.remove(&coordinate).is_some();
        if chunk.is_empty() {
            self.chunks.remove(&origin);
        }
        removed
    }

    pub fn annotate_tile(&mut self, coordinate: Coordinate, key: &str, data: Value) -> bool {
        self.push_operation(
            coordinate,
            TileOperation::Annotation {
                key: key.to_string(),
                data,
            },
        );
        true
    }

    pub fn operations(&self, coordinate: Coordinate) -> &[TileOperation] {
        self.chunks
            .get(&coordinate.chunk_origin(MAP_CHUNK_SIZE))
            .map(|chunk| chunk.operations(coordinate))
            .unwrap_or(&[])
    }

    pub fn resolved_stack(&self, coordinate: Coordinate) -> TileStack {
        let mut stack = TileStack::default();
        for operation in self.operations(coordinate) {
            stack.apply(operation);
        }
        stack
    }

    /// Latest value per key; later annotations override earlier ones
    pub fn annotations(&self, coordinate: Coordinate) -> Annotations {
        let mut table = Annotations::new();
        for operation in self.operations(coordinate) {
            if let TileOperation::Annotation { key, data } = operation {
                table.insert(key.clone(), data.clone());
            }
        }
        table
    }

    pub fn chunks(&self) -> impl Iterator<Item = &SparseChunk> {
        self.chunks.values()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Coordinates with recorded operations inside the padded window
    pub fn coordinates_in(&self, window: &ChunkWindow, padding: i32) -> Vec<Coordinate> {
        let mut found: Vec<Coordinate> = window
            .overlapping_chunks(padding, MAP_CHUNK_SIZE)
            .iter()
            .filter_map(|origin| self.chunks.get(origin))
            .flat_map(|chunk| chunk.operations.keys().copied())
            .filter(|coordinate| window.contains_padded(*coordinate, padding))
            .collect();
        found.sort();
        found
    }
}
