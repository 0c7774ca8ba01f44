//! Dense tile storage: flat per-chunk arrays, one structural tile per cell.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use super::{Annotations, TileId};
use crate::constants::{EMPTY_TILE, MAP_CHUNK_SIZE};
use crate::coords::{coordinate_map, ChunkWindow, Coordinate};

/// One 64×64 block of cells plus its annotation table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseChunk {
    origin: Coordinate,
    tiles: Vec<TileId>,
    /// Keyed by local cell index
    #[serde(default)]
    annotations: BTreeMap<usize, Annotations>,
}

impl DenseChunk {
    pub fn new(origin: Coordinate) -> Self {
        assert_eq!(
            origin,
            origin.chunk_origin(MAP_CHUNK_SIZE),
            "dense chunk origin {origin} is not chunk-aligned"
        );
        Self {
            origin,
            tiles: vec![EMPTY_TILE; (MAP_CHUNK_SIZE * MAP_CHUNK_SIZE) as usize],
            annotations: BTreeMap::new(),
        }
    }

    pub fn origin(&self) -> Coordinate {
        self.origin
    }

    /// Panics when `coordinate` lies outside this chunk
    fn index_of(&self, coordinate: Coordinate) -> usize {
        let lx = coordinate.x - self.origin.x;
        let ly = coordinate.y - self.origin.y;
        assert!(
            coordinate.z == self.origin.z
                && (0..MAP_CHUNK_SIZE).contains(&lx)
                && (0..MAP_CHUNK_SIZE).contains(&ly),
            "coordinate {coordinate} outside dense chunk at {}",
            self.origin
        );
        (lx + ly * MAP_CHUNK_SIZE) as usize
    }

    fn coordinate_of(&self, index: usize) -> Coordinate {
        let index = index as i32;
        self.origin
            .offset(index % MAP_CHUNK_SIZE, index / MAP_CHUNK_SIZE, 0)
    }

    pub fn get(&self, coordinate: Coordinate) -> TileId {
        self.tiles[self.index_of(coordinate)]
    }

    pub fn set(&mut self, coordinate: Coordinate, tile: TileId) {
        let index = self.index_of(coordinate);
        self.tiles[index] = tile;
    }

    pub fn annotate(&mut self, coordinate: Coordinate, key: &str, data: Value) {
        let index = self.index_of(coordinate);
        self.annotations
            .entry(index)
            .or_default()
            .insert(key.to_string(), data);
    }

    pub fn annotations(&self, coordinate: Coordinate) -> Option<&Annotations> {
        self.annotations.get(&self.index_of(coordinate))
    }

    /// Clear tile and annotations; true if anything was stored
    pub fn clear(&mut self, coordinate: Coordinate) -> bool {
        let index = self.index_of(coordinate);
        let had_tile = self.tiles[index] != EMPTY_TILE;
        self.tiles[index] = EMPTY_TILE;
        let had_annotations = self.annotations.remove(&index).is_some();
        had_tile || had_annotations
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty() && self.tiles.iter().all(|t| *t == EMPTY_TILE)
    }

    /// Non-empty cells in index order
    pub fn tiles(&self) -> impl Iterator<Item = (Coordinate, TileId)> + '_ {
        self.tiles
            .iter()
            .enumerate()
            .filter(|(_, tile)| **tile != EMPTY_TILE)
            .map(|(index, tile)| (self.coordinate_of(index), *tile))
    }

    pub fn annotated(&self) -> impl Iterator<Item = (Coordinate, &Annotations)> + '_ {
        self.annotations
            .iter()
            .map(|(index, table)| (self.coordinate_of(*index), table))
    }
}

/// Chunked dense layer. Placement never overwrites; use `replace_tile`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    #[serde(with = "coordinate_map")]
    chunks: HashMap<Coordinate, DenseChunk>,
}

impl DenseLayer {
    pub fn new() -> Self {
        Self::default()
    }

    fn chunk(&self, coordinate: Coordinate) -> Option<&DenseChunk> {
        self.chunks.get(&coordinate.chunk_origin(MAP_CHUNK_SIZE))
    }

    fn chunk_mut(&mut self, coordinate: Coordinate) -> &mut DenseChunk {
        let origin = coordinate.chunk_origin(MAP_CHUNK_SIZE);
        self.chunks
            .entry(origin)
            .or_insert_with(|| DenseChunk::new(origin))
    }

    pub fn place_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        if tile == EMPTY_TILE || self.tile_id(coordinate) != EMPTY_TILE {
            return false;
        }
        self.chunk_mut(coordinate).set(coordinate, tile);
        true
    }

    pub fn replace_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        self.chunk_mut(coordinate).set(coordinate, tile);
        true
    }

    /// No-op unless the stored id matches
    pub fn remove_tile(&mut self, coordinate: Coordinate, tile: TileId) -> bool {
        if tile == EMPTY_TILE || self.tile_id(coordinate) != tile {
            return false;
        }
        self.chunk_mut(coordinate).set(coordinate, EMPTY_TILE);
        true
    }

    pub fn reset_tile(&mut self, coordinate: Coordinate) -> bool {
        let origin = coordinate.chunk_origin(MAP_CHUNK_SIZE);
        let Some(chunk) = self.chunks.get_mut(&origin) else {
            return false;
        };
        let changed = chunk.clear(coordinate);
        if chunk.is_empty() {
            self.chunks.remove(&origin);
        }
        changed
    }

    pub fn annotate_tile(&mut self, coordinate: Coordinate, key: &str, data: Value) -> bool {
        self.chunk_mut(coordinate).annotate(coordinate, key, data);
        true
    }

    pub fn tile_id(&self, coordinate: Coordinate) -> TileId {
        self.chunk(coordinate)
            .map(|chunk| chunk.get(coordinate))
            .unwrap_or(EMPTY_TILE)
    }

    pub fn annotations(&self, coordinate: Coordinate) -> Option<&Annotations> {
        self.chunk(coordinate).and_then(|chunk| chunk.annotations(coordinate))
    }

    pub fn chunks(&self) -> impl Iterator<Item = &DenseChunk> {
        self.chunks.values()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Cells with a tile or annotations inside the padded window
    pub fn populated_in(&self, window: &ChunkWindow, padding: i32) -> Vec<Coordinate> {
        let mut found = Vec::new();
        for origin in window.overlapping_chunks(padding, MAP_CHUNK_SIZE) {
            let Some(chunk) = self.chunks.get(&origin) else {
                continue;
            };
            found.extend(
                chunk
                    .tiles()
                    .map(|(coordinate, _)| coordinate)
                    .chain(chunk.annotated().map(|(coordinate, _)| coordinate))
                    .filter(|coordinate| window.contains_padded(*coordinate, padding)),
            );
        }
        found.sort();
        found.dedup();
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(x: i32, y: i32) -> Coordinate {
        Coordinate::new(x, y, 0)
    }

    #[test]
    fn test_place_only_into_empty_cell() {
        let mut layer = DenseLayer::new();
        assert!(layer.place_tile(at(3, 3), 5));
        assert!(!layer.place_tile(at(3, 3), 5));
        assert!(!layer.place_tile(at(3, 3), 6));
        assert_eq!(layer.tile_id(at(3, 3)), 5);
    }

    #[test]
    fn test_place_empty_id_rejected() {
        let mut layer = DenseLayer::new();
        assert!(!layer.place_tile(at(0, 0), EMPTY_TILE));
        assert_eq!(layer.chunk_count(), 0);
    }

    #[test]
    fn test_replace_overwrites() {
        let mut layer = DenseLayer::new();
        layer.place_tile(at(1, 2), 5);
        assert!(layer.replace_tile(at(1, 2), 9));
        assert_eq!(layer.tile_id(at(1, 2)), 9);
    }

    #[test]
    fn test_remove_requires_match() {
        let mut layer = DenseLayer::new();
        layer.place_tile(at(-10, -10), 5);
        assert!(!layer.remove_tile(at(-10, -10), 4));
        assert_eq!(layer.tile_id(at(-10, -10)), 5);
        assert!(layer.remove_tile(at(-10, -10), 5));
        assert_eq!(layer.tile_id(at(-10, -10)), EMPTY_TILE);
    }

    #[test]
    fn test_reset_clears_annotations_and_drops_chunk() {
        let mut layer = DenseLayer::new();
        layer.place_tile(at(70, 70), 3);
        layer.annotate_tile(at(70, 70), "door", json!({"locked": true}));
        assert_eq!(layer.chunk_count(), 1);
        assert!(layer.reset_tile(at(70, 70)));
        assert_eq!(layer.tile_id(at(70, 70)), EMPTY_TILE);
        assert!(layer.annotations(at(70, 70)).is_none());
        assert_eq!(layer.chunk_count(), 0);
        assert!(!layer.reset_tile(at(70, 70)));
    }

    #[test]
    fn test_chunk_iteration_yields_absolute_coordinates() {
        let mut layer = DenseLayer::new();
        layer.place_tile(at(-1, 65), 2);
        let chunk = layer.chunks().next().unwrap();
        assert_eq!(chunk.origin(), at(-64, 64));
        let tiles: Vec<_> = chunk.tiles().collect();
        assert_eq!(tiles, vec![(at(-1, 65), 2)]);
    }

    #[test]
    #[should_panic(expected = "outside dense chunk")]
    fn test_out_of_bounds_write_panics() {
        let mut chunk = DenseChunk::new(at(0, 0));
        chunk.set(at(64, 0), 1);
    }

    #[test]
    fn test_populated_in_window() {
        let mut layer = DenseLayer::new();
        layer.place_tile(at(15, 15), 1);
        layer.place_tile(at(16, 16), 2);
        layer.place_tile(at(40, 40), 3);
        let window = ChunkWindow::new(0, 0, 0, 16, 16);
        assert_eq!(layer.populated_in(&window, 1), vec![at(15, 15), at(16, 16)]);
        assert_eq!(layer.populated_in(&window, 0), vec![at(15, 15)]);
    }
}
