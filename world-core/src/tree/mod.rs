//! Map Tree
//!
//! Ordered stack of layers for one dimension. Mutation calls are routed by
//! layer name:
//! - `"default"` → the `DefaultLayer` composite (base dense + default sparse),
//!   both auto-created on first access
//! - any other name → that layer, created lazily as a sparse layer
//!
//! Every successful mutation notifies the registered listeners with the
//! affected coordinate. The tree is not internally synchronized; all calls
//! must come from the owning tick thread.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::constants::DEFAULT_LAYER;
use crate::coords::Coordinate;
use crate::error::{WorldError, WorldResult};
use crate::layer::{
    Annotations, DefaultLayer, LayerStorage, MapLayer, TileId, TileMutator, TileOperation,
    TileStack,
};

pub type ListenerId = u64;

/// Observer of successful tree mutations
pub trait MapTreeListener: Send + Sync {
    fn on_tile_changed(&mut self, coordinate: Coordinate);
}

/// Listener that records changed coordinates for later draining.
///
/// Cloning shares the underlying set, so one clone can be subscribed to the
/// tree while the owner keeps another to drain.
#[derive(Debug, Clone, Default)]
pub struct ChangeCollector {
    changed: Arc<Mutex<BTreeSet<Coordinate>>>,
}

impl ChangeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every recorded coordinate, sorted
    pub fn drain(&self) -> Vec<Coordinate> {
        let mut changed = self.changed.lock();
        std::mem::take(&mut *changed).into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.changed.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.changed.lock().len()
    }
}

impl MapTreeListener for ChangeCollector {
    fn on_tile_changed(&mut self, coordinate: Coordinate) {
        self.changed.lock().insert(coordinate);
    }
}

/// Layer stack of one dimension
#[derive(Serialize, Deserialize, Default)]
pub struct MapTree {
    layers: Vec<MapLayer>,
    #[serde(default)]
    base_layer: Option<usize>,
    #[serde(default)]
    sparse_layer: Option<usize>,
    #[serde(skip)]
    listeners: Vec<(ListenerId, Box<dyn MapTreeListener>)>,
    #[serde(skip)]
    next_listener: ListenerId,
}

impl fmt::Debug for MapTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapTree")
            .field("layers", &self.layers.iter().map(MapLayer::name).collect::<Vec<_>>())
            .field("base_layer", &self.base_layer)
            .field("sparse_layer", &self.sparse_layer)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Borrow two distinct elements of a slice mutably
fn pair_mut<T>(items: &mut [T], first: usize, second: usize) -> (&mut T, &mut T) {
    assert_ne!(first, second, "pair_mut requires distinct indices");
    if first < second {
        let (left, right) = items.split_at_mut(second);
        (&mut left[first], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(first);
        (&mut right[0], &mut left[second])
    }
}

impl MapTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tree whose base is an `EmptyLayer`: every default-layer call lands in
    /// the sparse layer
    pub fn sparse_only() -> Self {
        let mut tree = Self::new();
        tree.base_layer = Some(0);
        tree.layers.push(MapLayer::empty(DEFAULT_LAYER));
        tree
    }

    // ========================================================================
    // Layer management
    // ========================================================================

    /// Append a pre-configured layer to the stacking order.
    ///
    /// The first base-capable layer becomes the base; a sparse layer named
    /// `"default"` becomes the default sparse layer.
    pub fn add_layer(&mut self, layer: MapLayer) -> WorldResult<()> {
        let is_default = layer.name() == DEFAULT_LAYER;
        if !is_default && self.layer_index(layer.name()).is_some() {
            return Err(WorldError::DuplicateLayer(layer.name().to_string()));
        }
        if layer.is_base_capable() && self.base_layer.is_none() {
            self.base_layer = Some(self.layers.len());
        } else if is_default && layer.is_sparse() && self.sparse_layer.is_none() {
            self.sparse_layer = Some(self.layers.len());
        } else if is_default {
            return Err(WorldError::DuplicateLayer(layer.name().to_string()));
        }
        debug!(layer = layer.name(), index = self.layers.len(), "Layer added");
        self.layers.push(layer);
        Ok(())
    }

    fn insert_layer(&mut self, index: usize, layer: MapLayer) {
        self.layers.insert(index, layer);
        for slot in [&mut self.base_layer, &mut self.sparse_layer].into_iter().flatten() {
            if *slot >= index {
                *slot += 1;
            }
        }
    }

    /// Create the base and default sparse layers if absent, keeping them at
    /// the bottom of the stacking order. Returns `(base, sparse)` indices.
    fn ensure_default(&mut self) -> (usize, usize) {
        let base = match self.base_layer {
            Some(index) => index,
            None => {
                self.insert_layer(0, MapLayer::dense(DEFAULT_LAYER));
                self.base_layer = Some(0);
                debug!("Created base dense layer");
                0
            }
        };
        let sparse = match self.sparse_layer {
            Some(index) => index,
            None => {
                let index = base + 1;
                self.insert_layer(index, MapLayer::sparse(DEFAULT_LAYER));
                self.sparse_layer = Some(index);
                debug!("Created default sparse layer");
                index
            }
        };
        (base, sparse)
    }

    fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.name() == name)
    }

    /// Index of a named (non-default) layer, created as sparse if missing
    fn named_layer_index(&mut self, name: &str) -> usize {
        match self.layer_index(name) {
            Some(index) => index,
            None => {
                debug!(layer = name, "Created sparse layer on first lookup");
                self.layers.push(MapLayer::sparse(name));
                self.layers.len() - 1
            }
        }
    }

    fn default_layer(&mut self) -> DefaultLayer<'_> {
        let (base, sparse) = self.ensure_default();
        let (base, sparse) = pair_mut(&mut self.layers, base, sparse);
        DefaultLayer::new(base, sparse)
    }

    /// Run `mutate` against the layer `name` resolves to, notifying on success
    fn mutate<F>(&mut self, layer: &str, coordinate: Coordinate, mutate: F) -> bool
    where
        F: FnOnce(&mut dyn TileMutator) -> bool,
    {
        let changed = if layer == DEFAULT_LAYER {
            mutate(&mut self.default_layer())
        } else {
            let index = self.named_layer_index(layer);
            mutate(&mut self.layers[index])
        };
        if changed {
            self.notify(coordinate);
        }
        changed
    }

    pub fn layers(&self) -> &[MapLayer] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&MapLayer> {
        self.layers.iter().find(|layer| layer.name() == name)
    }

    pub fn base_layer(&self) -> Option<&MapLayer> {
        self.base_layer.map(|index| &self.layers[index])
    }

    pub fn sparse_layer(&self) -> Option<&MapLayer> {
        self.sparse_layer.map(|index| &self.layers[index])
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn place_tile(&mut self, coordinate: Coordinate, tile: TileId, layer: &str) -> bool {
        self.mutate(layer, coordinate, |target| target.place_tile(coordinate, tile))
    }

    pub fn replace_tile(&mut self, coordinate: Coordinate, tile: TileId, layer: &str) -> bool {
        self.mutate(layer, coordinate, |target| target.replace_tile(coordinate, tile))
    }

    pub fn remove_tile(&mut self, coordinate: Coordinate, tile: TileId, layer: &str) -> bool {
        self.mutate(layer, coordinate, |target| target.remove_tile(coordinate, tile))
    }

    pub fn reset_tile(&mut self, coordinate: Coordinate, layer: &str) -> bool {
        self.mutate(layer, coordinate, |target| target.reset_tile(coordinate))
    }

    pub fn annotate_tile(&mut self, coordinate: Coordinate, key: &str, data: Value, layer: &str) -> bool {
        self.mutate(layer, coordinate, |target| target.annotate_tile(coordinate, key, data))
    }

    /// Layers a tag toggle applies to: both default halves, or the named layer
    fn tag_targets(&self, layer: &str) -> Vec<usize> {
        if layer == DEFAULT_LAYER {
            self.base_layer.into_iter().chain(self.sparse_layer).collect()
        } else {
            self.layer_index(layer).into_iter().collect()
        }
    }

    /// Returns true if any layer's visibility tags changed
    pub fn set_visibility_tag(&mut self, layer: &str, tag: &str, enabled: bool) -> bool {
        let mut changed = false;
        for index in self.tag_targets(layer) {
            changed |= self.layers[index].visibility_tags_mut().set(tag, enabled);
        }
        changed
    }

    /// Returns true if any layer's collision tags changed
    pub fn set_collision_tag(&mut self, layer: &str, tag: &str, enabled: bool) -> bool {
        let mut changed = false;
        for index in self.tag_targets(layer) {
            changed |= self.layers[index].collision_tags_mut().set(tag, enabled);
        }
        changed
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    pub fn subscribe(&mut self, listener: Box<dyn MapTreeListener>) -> ListenerId {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns true if a listener was removed
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    fn notify(&mut self, coordinate: Coordinate) {
        trace!(%coordinate, listeners = self.listeners.len(), "Tile changed");
        for (_, listener) in &mut self.listeners {
            listener.on_tile_changed(coordinate);
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Resolved stack across every layer, in stacking order
    pub fn resolved_stack(&self, coordinate: Coordinate) -> TileStack {
        let mut stack = TileStack::default();
        for layer in &self.layers {
            layer.apply_to(coordinate, &mut stack);
        }
        stack
    }

    pub fn tile_id(&self, coordinate: Coordinate) -> TileId {
        self.resolved_stack(coordinate).base
    }

    /// Annotations merged across layers; later layers override
    pub fn annotations(&self, coordinate: Coordinate) -> Annotations {
        let mut table = Annotations::new();
        for layer in &self.layers {
            table.extend(layer.annotations(coordinate));
        }
        table
    }

    // ========================================================================
    // Merge & fragments
    // ========================================================================

    /// Replay another tree's contents into this one, layer by layer.
    ///
    /// Dense cells are written with `replace`, sparse operation lists are
    /// appended in their original order, annotations are re-applied. The
    /// other tree's base/default sparse layers map onto ours; other layers
    /// map by name and are created with the source's kind and tags.
    pub fn merge(&mut self, other: &MapTree) {
        let mut touched = BTreeSet::new();

        for (source_index, source) in other.layers.iter().enumerate() {
            let target_index = if Some(source_index) == other.base_layer {
                self.ensure_default().0
            } else if Some(source_index) == other.sparse_layer {
                self.ensure_default().1
            } else {
                match self.layer_index(source.name()) {
                    Some(index) => index,
                    None => {
                        self.layers.push(source.empty_like());
                        self.layers.len() - 1
                    }
                }
            };
            let falls_back = Some(target_index) == self.base_layer;
            self.merge_layer(source, target_index, falls_back, &mut touched);
        }

        debug!(coordinates = touched.len(), "Merged map tree fragment");
        for coordinate in touched {
            self.notify(coordinate);
        }
    }

    fn merge_layer(
        &mut self,
        source: &MapLayer,
        target_index: usize,
        base_target: bool,
        touched: &mut BTreeSet<Coordinate>,
    ) {
        match source.storage() {
            LayerStorage::Dense(dense) => {
                for chunk in dense.chunks() {
                    for (coordinate, tile) in chunk.tiles() {
                        let written = if base_target {
                            self.default_layer().replace_tile(coordinate, tile)
                        } else {
                            self.layers[target_index].replace_tile(coordinate, tile)
                        };
                        if written {
                            touched.insert(coordinate);
                        }
                    }
                    for (coordinate, table) in chunk.annotated() {
                        for (key, data) in table {
                            let written = if base_target {
                                self.default_layer().annotate_tile(coordinate, key, data.clone())
                            } else {
                                self.layers[target_index].annotate_tile(coordinate, key, data.clone())
                            };
                            if written {
                                touched.insert(coordinate);
                            }
                        }
                    }
                }
            }
            LayerStorage::Sparse(sparse) => {
                for chunk in sparse.chunks() {
                    for (coordinate, operations) in chunk.entries() {
                        for operation in operations {
                            if self.replay_operation(target_index, coordinate, operation) {
                                touched.insert(coordinate);
                            }
                        }
                    }
                }
            }
            LayerStorage::Empty(_) => {}
        }
    }

    /// Sparse targets take the raw operation; other targets get the
    /// equivalent mutation call
    fn replay_operation(&mut self, target_index: usize, coordinate: Coordinate, operation: &TileOperation) -> bool {
        let target = &mut self.layers[target_index];
        if let LayerStorage::Sparse(layer) = target.storage_mut() {
            layer.push_operation(coordinate, operation.clone());
            return true;
        }
        match operation {
            TileOperation::Placement { tile } => target.place_tile(coordinate, *tile),
            TileOperation::Replacement { tile } => target.replace_tile(coordinate, *tile),
            TileOperation::Removal { tile } => target.remove_tile(coordinate, *tile),
            TileOperation::Annotation { key, data } => target.annotate_tile(coordinate, key, data.clone()),
        }
    }

    /// Parse an externally authored fragment. The default-layer slots must
    /// point at distinct layers of the right kind, and non-default names
    /// must be unique.
    pub fn from_json(json: &str) -> WorldResult<Self> {
        let tree: Self = serde_json::from_str(json)?;
        tree.validate()?;
        Ok(tree)
    }

    fn validate(&self) -> WorldResult<()> {
        let slot = |role: &str, index: Option<usize>| -> WorldResult<Option<&MapLayer>> {
            match index {
                None => Ok(None),
                Some(index) => self.layers.get(index).map(Some).ok_or_else(|| {
                    WorldError::InvalidMap(format!("{role} layer index {index} out of {} layers", self.layers.len()))
                }),
            }
        };
        let base = slot("base", self.base_layer)?;
        let sparse = slot("sparse", self.sparse_layer)?;

        if self.base_layer.is_some() && self.base_layer == self.sparse_layer {
            return Err(WorldError::InvalidMap("base and sparse layers share an index".to_string()));
        }
        if let Some(layer) = base.filter(|layer| !layer.is_base_capable()) {
            return Err(WorldError::InvalidMap(format!("base layer '{}' is sparse", layer.name())));
        }
        if let Some(layer) = sparse.filter(|layer| !layer.is_sparse()) {
            return Err(WorldError::InvalidMap(format!("default sparse layer '{}' is not sparse", layer.name())));
        }

        let mut names = BTreeSet::new();
        for layer in self.layers.iter().filter(|layer| layer.name() != DEFAULT_LAYER) {
            if !names.insert(layer.name()) {
                return Err(WorldError::DuplicateLayer(layer.name().to_string()));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> WorldResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
