//! Scoped Views
//!
//! A `ScopedView` is one window's worth of materialized tile state for one
//! viewer. It is rebuilt on demand (initial sync, camera move, dirty re-push)
//! and never cached.
//!
//! Layout:
//! - `base`: padded row-major array, `(width + 2p) × (height + 2p)`
//! - `additional`: coordinate → ordered overlay tile ids
//! - `annotations`: coordinate → merged annotation table
//!
//! The padding ring exists so the transition pass can read the neighbours of
//! boundary cells without a second fetch.

use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::trace;

use crate::constants::{EMPTY_TILE, VIEW_PADDING};
use crate::coords::{ChunkWindow, Coordinate};
use crate::error::WireError;
use crate::layer::{Annotations, TileId, TileStack};
use crate::transition::{TransitionRegistry, TransitionResolver};
use crate::tree::MapTree;
use crate::viewer::Viewer;
use crate::wire::{AdditionalTile, MapChunkPacket};

// ============================================================================
// ScopedView
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ScopedView {
    window: ChunkWindow,
    padding: i32,
    base: Vec<TileId>,
    additional: BTreeMap<Coordinate, Vec<TileId>>,
    annotations: BTreeMap<Coordinate, Annotations>,
}

impl ScopedView {
    pub fn new(window: ChunkWindow, padding: i32) -> Self {
        let cells = (window.padded_width(padding) * window.padded_height(padding)).max(0) as usize;
        Self {
            window,
            padding,
            base: vec![EMPTY_TILE; cells],
            additional: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn window(&self) -> ChunkWindow {
        self.window
    }

    pub fn padding(&self) -> i32 {
        self.padding
    }

    /// Padded base array, row-major
    pub fn base(&self) -> &[TileId] {
        &self.base
    }

    /// Padded index of window-relative `(dx, dy)`; `None` outside the padded region
    fn relative_index(&self, dx: i32, dy: i32) -> Option<usize> {
        let px = dx + self.padding;
        let py = dy + self.padding;
        let width = self.window.padded_width(self.padding);
        let height = self.window.padded_height(self.padding);
        if px < 0 || py < 0 || px >= width || py >= height {
            return None;
        }
        Some((px + py * width) as usize)
    }

    /// Padded index of an absolute coordinate
    pub fn local_index(&self, coordinate: Coordinate) -> Option<usize> {
        if coordinate.z != self.window.z {
            return None;
        }
        self.relative_index(coordinate.x - self.window.x, coordinate.y - self.window.y)
    }

    /// Base tile relative to the window origin; range
    /// `-padding..width + padding`. Empty outside the padded region.
    pub fn base_tile_at_relative(&self, dx: i32, dy: i32) -> TileId {
        self.relative_index(dx, dy)
            .map_or(EMPTY_TILE, |index| self.base[index])
    }

    pub fn base_tile_at(&self, coordinate: Coordinate) -> TileId {
        self.local_index(coordinate)
            .map_or(EMPTY_TILE, |index| self.base[index])
    }

    /// Panics when `coordinate` is outside the padded region
    pub fn set_base(&mut self, coordinate: Coordinate, tile: TileId) {
        let index = self.local_index(coordinate).unwrap_or_else(|| {
            panic!("coordinate {coordinate} outside view {} (padding {})", self.window, self.padding)
        });
        self.base[index] = tile;
    }

    pub fn additional_at(&self, coordinate: Coordinate) -> &[TileId] {
        self.additional
            .get(&coordinate)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn push_additional(&mut self, coordinate: Coordinate, tile: TileId) {
        self.additional.entry(coordinate).or_default().push(tile);
    }

    /// Insert at the front so the tile renders beneath dynamic overlays
    pub fn prepend_additional(&mut self, coordinate: Coordinate, tile: TileId) {
        self.additional.entry(coordinate).or_default().insert(0, tile);
    }

    pub fn additional(&self) -> &BTreeMap<Coordinate, Vec<TileId>> {
        &self.additional
    }

    pub fn annotations_at(&self, coordinate: Coordinate) -> Option<&Annotations> {
        self.annotations.get(&coordinate)
    }

    /// Resolved stack at a coordinate inside the padded region
    pub fn stack_at(&self, coordinate: Coordinate) -> TileStack {
        TileStack::new(self.base_tile_at(coordinate), self.additional_at(coordinate).to_vec())
    }

    fn write_stack(&mut self, coordinate: Coordinate, stack: TileStack) {
        self.set_base(coordinate, stack.base);
        if stack.additional.is_empty() {
            self.additional.remove(&coordinate);
        } else {
            self.additional.insert(coordinate, stack.additional);
        }
    }
}

// ============================================================================
// ChunkViewManager
// ============================================================================

/// Materializes per-viewer views of a dimension's tree
#[derive(Debug, Clone, Copy)]
pub struct ChunkViewManager<'a> {
    transitions: &'a TransitionRegistry,
    padding: i32,
}

impl<'a> ChunkViewManager<'a> {
    pub fn new(transitions: &'a TransitionRegistry) -> Self {
        Self {
            transitions,
            padding: VIEW_PADDING,
        }
    }

    pub fn with_padding(mut self, padding: i32) -> Self {
        self.padding = padding;
        self
    }

    /// Compose every layer `viewer` may see in stacking order, then run the
    /// transition pass
    pub fn materialize(&self, tree: &MapTree, viewer: &Viewer, window: ChunkWindow) -> ScopedView {
        let mut view = ScopedView::new(window, self.padding);

        for layer in tree.layers() {
            if !viewer.can_view_layer(layer) {
                continue;
            }
            for coordinate in layer.populated_in(&window, self.padding) {
                let mut stack = view.stack_at(coordinate);
                layer.apply_to(coordinate, &mut stack);
                view.write_stack(coordinate, stack);

                let table = layer.annotations(coordinate);
                if !table.is_empty() {
                    view.annotations.entry(coordinate).or_default().extend(table);
                }
            }
        }

        TransitionResolver::new(self.transitions).apply(&mut view);
        trace!(%window, overlays = view.additional.len(), "View materialized");
        view
    }

    /// Materialize several windows in parallel; results follow input order
    pub fn materialize_many(&self, tree: &MapTree, viewer: &Viewer, windows: &[ChunkWindow]) -> Vec<ScopedView> {
        windows
            .par_iter()
            .map(|window| self.materialize(tree, viewer, *window))
            .collect()
    }

    /// Wire form of a view: the window's base tiles and every overlay inside it.
    ///
    /// Fails if an overlay offset does not fit a byte or the packet would not
    /// fit one frame.
    pub fn to_packet(view: &ScopedView) -> Result<MapChunkPacket, WireError> {
        let window = view.window();
        let mut tiles = Vec::with_capacity((window.width * window.height).max(0) as usize);
        for dy in 0..window.height {
            for dx in 0..window.width {
                tiles.push(view.base_tile_at_relative(dx, dy));
            }
        }

        let offset = |delta: i32| {
            u8::try_from(delta).map_err(|_| WireError::InvalidLength(format!("overlay offset {delta} in window {window}")))
        };
        let mut additional = Vec::new();
        for (coordinate, ids) in view.additional() {
            if !window.contains(*coordinate) {
                continue;
            }
            let dx = offset(coordinate.x - window.x)?;
            let dy = offset(coordinate.y - window.y)?;
            additional.extend(ids.iter().map(|tile| AdditionalTile { dx, dy, tile: *tile }));
        }

        let packet = MapChunkPacket {
            window,
            tiles,
            additional,
        };
        packet.check_frame()?;
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DEFAULT_LAYER, SYNC_CHUNK_SIZE};
    use crate::layer::MapLayer;
    use crate::transition::{TransitionDefinition, TransitionRule, FULL_MASK};
    use crate::viewer::TagSet;

    fn at(x: i32, y: i32) -> Coordinate {
        Coordinate::new(x, y, 0)
    }

    fn default_viewer() -> Viewer {
        Viewer::sight(TagSet::default())
    }

    #[test]
    fn test_padded_base_length() {
        let view = ScopedView::new(ChunkWindow::new(0, 0, 0, 16, 16), 1);
        assert_eq!(view.base().len(), 18 * 18);
    }

    #[test]
    fn test_relative_lookup_matches_tree_in_padded_region() {
        let mut tree = MapTree::new();
        for (i, (x, y)) in [(-1, -1), (0, 0), (15, 15), (16, 16), (7, -1)].into_iter().enumerate() {
            tree.place_tile(at(x, y), i as TileId + 1, DEFAULT_LAYER);
        }
        tree.place_tile(at(17, 17), 50, DEFAULT_LAYER);

        let registry = TransitionRegistry::new();
        let window = ChunkWindow::new(0, 0, 0, 16, 16);
        let view = ChunkViewManager::new(&registry).materialize(&tree, &default_viewer(), window);

        for dy in -1..17 {
            for dx in -1..17 {
                assert_eq!(view.base_tile_at_relative(dx, dy), tree.tile_id(at(dx, dy)));
            }
        }
        // outside padding is not fetched
        assert_eq!(view.base_tile_at(at(17, 17)), EMPTY_TILE);
    }

    #[test]
    fn test_hidden_layers_are_skipped() {
        let mut tree = MapTree::new();
        tree.place_tile(at(2, 2), 1, DEFAULT_LAYER);
        tree.add_layer(MapLayer::sparse("secret").with_visibility_tags(TagSet::from_tags(["ghost"])))
            .unwrap();
        tree.place_tile(at(2, 2), 9, "secret");

        let registry = TransitionRegistry::new();
        let manager = ChunkViewManager::new(&registry);
        let window = ChunkWindow::aligned(at(2, 2), SYNC_CHUNK_SIZE);

        let plain = manager.materialize(&tree, &default_viewer(), window);
        assert_eq!(plain.stack_at(at(2, 2)), TileStack::new(1, vec![]));

        let ghost = Viewer::sight(TagSet::from_tags(["default", "ghost"]));
        let seen = manager.materialize(&tree, &ghost, window);
        assert_eq!(seen.stack_at(at(2, 2)), TileStack::new(1, vec![9]));
    }

    #[test]
    fn test_sparse_promotion_visible_in_view() {
        let mut tree = MapTree::sparse_only();
        for tile in [5, 7, 9] {
            tree.place_tile(at(3, 3), tile, DEFAULT_LAYER);
        }
        tree.remove_tile(at(3, 3), 5, DEFAULT_LAYER);
        let registry = TransitionRegistry::new();
        let view = ChunkViewManager::new(&registry).materialize(
            &tree,
            &default_viewer(),
            ChunkWindow::new(0, 0, 0, 16, 16),
        );
        assert_eq!(view.stack_at(at(3, 3)), TileStack::new(7, vec![9]));
    }

    #[test]
    fn test_transition_inserted_before_overlays() {
        let mut tree = MapTree::new();
        for y in 0..3 {
            for x in 0..3 {
                tree.place_tile(at(x, y), 2, DEFAULT_LAYER);
            }
        }
        tree.replace_tile(at(1, 1), 1, DEFAULT_LAYER);
        tree.place_tile(at(1, 1), 40, DEFAULT_LAYER);

        let mut registry = TransitionRegistry::new();
        registry.insert(2, TransitionDefinition::new(1, vec![TransitionRule::new(FULL_MASK, 0, 77)]));
        let view = ChunkViewManager::new(&registry).materialize(
            &tree,
            &default_viewer(),
            ChunkWindow::new(0, 0, 0, 16, 16),
        );
        assert_eq!(view.additional_at(at(1, 1)), &[77, 40]);
    }

    #[test]
    fn test_materialize_many_preserves_order() {
        let mut tree = MapTree::new();
        tree.place_tile(at(20, 3), 4, DEFAULT_LAYER);
        let registry = TransitionRegistry::new();
        let windows = ChunkWindow::around(at(0, 0), 1, 0, SYNC_CHUNK_SIZE);
        let views = ChunkViewManager::new(&registry).materialize_many(&tree, &default_viewer(), &windows);
        assert_eq!(views.len(), windows.len());
        for (view, window) in views.iter().zip(&windows) {
            assert_eq!(view.window(), *window);
        }
    }

    #[test]
    fn test_to_packet_relative_overlays() {
        let mut tree = MapTree::new();
        tree.place_tile(at(17, 18), 3, DEFAULT_LAYER);
        tree.place_tile(at(17, 18), 4, DEFAULT_LAYER);
        tree.place_tile(at(17, 18), 5, DEFAULT_LAYER);
        // padding cell overlays are not part of the packet
        tree.place_tile(at(15, 16), 8, DEFAULT_LAYER);
        tree.place_tile(at(15, 16), 9, DEFAULT_LAYER);

        let registry = TransitionRegistry::new();
        let window = ChunkWindow::new(16, 16, 0, 16, 16);
        let view = ChunkViewManager::new(&registry).materialize(&tree, &default_viewer(), window);
        let packet = ChunkViewManager::to_packet(&view).unwrap();

        assert_eq!(packet.tiles.len(), 256);
        assert_eq!(packet.tiles[1 + 2 * 16], 3);
        assert_eq!(
            packet.additional,
            vec![
                AdditionalTile { dx: 1, dy: 2, tile: 4 },
                AdditionalTile { dx: 1, dy: 2, tile: 5 },
            ]
        );
    }

    #[test]
    fn test_to_packet_rejects_offsets_past_a_byte() {
        let mut tree = MapTree::new();
        tree.place_tile(at(280, 0), 3, DEFAULT_LAYER);
        tree.place_tile(at(280, 0), 4, DEFAULT_LAYER);

        let registry = TransitionRegistry::new();
        let manager = ChunkViewManager::new(&registry);
        let wide = manager.materialize(&tree, &default_viewer(), ChunkWindow::new(0, 0, 0, 300, 1));
        assert!(matches!(ChunkViewManager::to_packet(&wide), Err(WireError::InvalidLength(_))));

        // same overlay, inside a byte of its window origin
        let near = manager.materialize(&tree, &default_viewer(), ChunkWindow::new(272, 0, 0, 16, 1));
        let packet = ChunkViewManager::to_packet(&near).unwrap();
        assert_eq!(packet.additional, vec![AdditionalTile { dx: 8, dy: 0, tile: 4 }]);
    }
}
