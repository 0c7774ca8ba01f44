//! World State
//!
//! The authoritative façade the tick loop and the scripting layer talk to:
//! - Dimensions: one `MapTree` + one `DimensionSyncManager` each
//! - Entities: a single `EntityManager` shared by every dimension
//! - Players: one `PlayerSyncManager` per connection
//!
//! Tile mutations are collected per dimension and re-pushed once per tick
//! by `flush_changes`. Entity operations fan out immediately.

mod entities;
mod input;

pub use input::InputOutcome;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::WorldConfig;
use crate::constants::SYNC_CHUNK_SIZE;
use crate::coords::{ChunkWindow, Coordinate};
use crate::entity::EntityManager;
use crate::error::{WorldError, WorldResult};
use crate::registry::Registries;
use crate::sync::{Camera, ConnectionId, DimensionSyncManager, PacketSink, PlayerSyncManager, SyncContext, SyncReport};
use crate::tree::{ChangeCollector, MapTree};
use crate::viewer::{Viewer, ViewerPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimensionId(pub u32);

impl fmt::Display for DimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dim-{}", self.0)
    }
}

/// One map tree plus the connections watching it
#[derive(Debug)]
pub struct Dimension {
    id: DimensionId,
    name: String,
    tree: MapTree,
    sync: DimensionSyncManager,
    changes: ChangeCollector,
}

impl Dimension {
    fn new(id: DimensionId, name: String, mut tree: MapTree) -> Self {
        let changes = ChangeCollector::new();
        tree.subscribe(Box::new(changes.clone()));
        Self {
            id,
            name,
            tree,
            sync: DimensionSyncManager::new(id),
            changes,
        }
    }

    pub fn id(&self) -> DimensionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tree(&self) -> &MapTree {
        &self.tree
    }

    pub fn sync(&self) -> &DimensionSyncManager {
        &self.sync
    }

    /// Coordinates mutated since the last flush
    pub fn pending_changes(&self) -> usize {
        self.changes.len()
    }
}

pub struct WorldState {
    registries: Arc<Registries>,
    config: WorldConfig,
    dimensions: BTreeMap<DimensionId, Dimension>,
    dimension_names: HashMap<String, DimensionId>,
    next_dimension: u32,
    entities: EntityManager,
    players: BTreeMap<ConnectionId, PlayerSyncManager>,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("dimensions", &self.dimensions.len())
            .field("entities", &self.entities.len())
            .field("players", &self.players.len())
            .finish()
    }
}

impl WorldState {
    pub fn new(registries: Arc<Registries>, config: WorldConfig) -> Self {
        Self {
            registries,
            config,
            dimensions: BTreeMap::new(),
            dimension_names: HashMap::new(),
            next_dimension: 1,
            entities: EntityManager::new(),
            players: BTreeMap::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    pub fn player(&self, connection: ConnectionId) -> Option<&PlayerSyncManager> {
        self.players.get(&connection)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn dimension(&self, id: DimensionId) -> Option<&Dimension> {
        self.dimensions.get(&id)
    }

    pub fn dimension_id(&self, name: &str) -> WorldResult<DimensionId> {
        self.dimension_names
            .get(name)
            .copied()
            .ok_or_else(|| WorldError::UnknownDimensionName(name.to_string()))
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.values()
    }

    fn require_dimension(&self, id: DimensionId) -> WorldResult<&Dimension> {
        self.dimensions.get(&id).ok_or(WorldError::UnknownDimension(id))
    }

    fn tree_mut(&mut self, id: DimensionId) -> WorldResult<&mut MapTree> {
        self.dimensions
            .get_mut(&id)
            .map(|dimension| &mut dimension.tree)
            .ok_or(WorldError::UnknownDimension(id))
    }

    // ========================================================================
    // Dimensions
    // ========================================================================

    pub fn create_dimension(&mut self, name: &str, tree: MapTree) -> WorldResult<DimensionId> {
        if self.dimension_names.contains_key(name) {
            return Err(WorldError::DuplicateDimension(name.to_string()));
        }
        let id = DimensionId(self.next_dimension);
        self.next_dimension += 1;
        self.dimension_names.insert(name.to_string(), id);
        self.dimensions.insert(id, Dimension::new(id, name.to_string(), tree));
        info!(dimension = %id, name, "Dimension created");
        Ok(id)
    }

    // ========================================================================
    // Tiles (scripting surface; names resolve through the registries)
    // ========================================================================

    pub fn place_tile(&mut self, dimension: DimensionId, coordinate: Coordinate, tile: &str, layer: &str) -> WorldResult<bool> {
        let tile = self.registries.tile_id(tile)?;
        Ok(self.tree_mut(dimension)?.place_tile(coordinate, tile, layer))
    }

    pub fn replace_tile(&mut self, dimension: DimensionId, coordinate: Coordinate, tile: &str, layer: &str) -> WorldResult<bool> {
        let tile = self.registries.tile_id(tile)?;
        Ok(self.tree_mut(dimension)?.replace_tile(coordinate, tile, layer))
    }

    pub fn remove_tile(&mut self, dimension: DimensionId, coordinate: Coordinate, tile: &str, layer: &str) -> WorldResult<bool> {
        let tile = self.registries.tile_id(tile)?;
        Ok(self.tree_mut(dimension)?.remove_tile(coordinate, tile, layer))
    }

    pub fn reset_tile(&mut self, dimension: DimensionId, coordinate: Coordinate, layer: &str) -> WorldResult<bool> {
        Ok(self.tree_mut(dimension)?.reset_tile(coordinate, layer))
    }

    pub fn annotate_tile(
        &mut self,
        dimension: DimensionId,
        coordinate: Coordinate,
        key: &str,
        data: Value,
        layer: &str,
    ) -> WorldResult<bool> {
        Ok(self.tree_mut(dimension)?.annotate_tile(coordinate, key, data, layer))
    }

    /// Replay `other` into the dimension's tree
    pub fn merge_tree(&mut self, dimension: DimensionId, other: &MapTree) -> WorldResult<()> {
        self.tree_mut(dimension)?.merge(other);
        Ok(())
    }

    /// Toggling a layer tag changes what every watcher may see, so each
    /// watcher is fully re-pushed
    pub fn set_layer_visibility_tag(&mut self, dimension: DimensionId, layer: &str, tag: &str, enabled: bool) -> WorldResult<bool> {
        let changed = self.tree_mut(dimension)?.set_visibility_tag(layer, tag, enabled);
        if changed {
            self.resync_dimension(dimension)?;
        }
        Ok(changed)
    }

    /// Collision tags never reach the client; nothing to re-push
    pub fn set_layer_collision_tag(&mut self, dimension: DimensionId, layer: &str, tag: &str, enabled: bool) -> WorldResult<bool> {
        Ok(self.tree_mut(dimension)?.set_collision_tag(layer, tag, enabled))
    }

    fn resync_dimension(&mut self, id: DimensionId) -> WorldResult<()> {
        let WorldState {
            registries,
            config,
            dimensions,
            entities,
            players,
            ..
        } = self;
        let dimension = dimensions.get(&id).ok_or(WorldError::UnknownDimension(id))?;
        let ctx = SyncContext::new(&dimension.tree, &registries.transitions, entities, config);
        dimension.sync.resync_all(players, &ctx);
        debug!(dimension = %id, watchers = dimension.sync.watcher_count(), "Dimension resynced");
        Ok(())
    }

    /// Tick-end pass: re-push every synced window made stale by tile
    /// mutations since the last flush. Returns the number of windows sent.
    pub fn flush_changes(&mut self) -> usize {
        let WorldState {
            registries,
            config,
            dimensions,
            entities,
            players,
            ..
        } = self;
        let mut pushed = 0;
        for dimension in dimensions.values() {
            if dimension.changes.is_empty() {
                continue;
            }
            let stale: BTreeSet<ChunkWindow> = dimension
                .changes
                .drain()
                .into_iter()
                .flat_map(|coordinate| ChunkWindow::neighborhood_windows(coordinate, SYNC_CHUNK_SIZE))
                .collect();
            let stale: Vec<ChunkWindow> = stale.into_iter().collect();
            let ctx = SyncContext::new(&dimension.tree, &registries.transitions, entities, config);
            let sent = dimension.sync.tiles_changed(players, &stale, &ctx);
            debug!(dimension = %dimension.id, stale = stale.len(), sent, "Flushed tile changes");
            pushed += sent;
        }
        pushed
    }

    // ========================================================================
    // Players
    // ========================================================================

    /// Attach a new connection's camera and run its initial sync
    pub fn connect_player(
        &mut self,
        connection: ConnectionId,
        sink: Box<dyn PacketSink>,
        viewers: ViewerPair,
        dimension: DimensionId,
        center: Coordinate,
    ) -> WorldResult<SyncReport> {
        self.require_dimension(dimension)?;
        if self.players.contains_key(&connection) {
            warn!(%connection, "Connection id reused; discarding previous sync state");
            self.disconnect_player(connection);
        }

        let mut player = PlayerSyncManager::new(connection, sink).with_viewers(viewers);
        player.attach(Camera::new(dimension, center));

        let WorldState {
            registries,
            config,
            dimensions,
            entities,
            players,
            ..
        } = self;
        let dim = dimensions.get_mut(&dimension).ok_or(WorldError::UnknownDimension(dimension))?;
        let ctx = SyncContext::new(&dim.tree, &registries.transitions, entities, config);
        let report = player.update(&ctx);
        dim.sync.register(connection);
        players.insert(connection, player);
        info!(%connection, %dimension, chunks = report.chunks_added, entities = report.entities_added, "Player connected");
        Ok(report)
    }

    /// Discard the connection's sync state; nothing is sent
    pub fn disconnect_player(&mut self, connection: ConnectionId) -> bool {
        let Some(player) = self.players.remove(&connection) else {
            return false;
        };
        if let Some(camera) = player.camera() {
            if let Some(dimension) = self.dimensions.get_mut(&camera.dimension) {
                dimension.sync.unregister(connection);
            }
        }
        info!(%connection, "Player disconnected");
        true
    }

    /// Move a free camera. A camera following an entity is moved by the
    /// entity instead.
    pub fn move_player_camera(&mut self, connection: ConnectionId, center: Coordinate) -> WorldResult<SyncReport> {
        let WorldState {
            registries,
            config,
            dimensions,
            entities,
            players,
            ..
        } = self;
        let player = players
            .get_mut(&connection)
            .ok_or(WorldError::UnknownConnection(connection))?;
        let Some(camera) = player.camera() else {
            return Ok(SyncReport::default());
        };
        let dimension = dimensions
            .get(&camera.dimension)
            .ok_or(WorldError::UnknownDimension(camera.dimension))?;
        let ctx = SyncContext::new(&dimension.tree, &registries.transitions, entities, config);
        Ok(player.move_camera(center, &ctx))
    }

    /// Bind the camera to an entity, moving (or reattaching) it there
    pub fn follow_entity(&mut self, connection: ConnectionId, entity: crate::entity::NetworkId) -> WorldResult<SyncReport> {
        let target = self.entities.get(entity).ok_or(WorldError::UnknownEntity(entity))?;
        let dimension = target.dimension.ok_or(WorldError::UnknownEntity(entity))?;
        let center = target.coordinate;
        let player = self
            .players
            .get_mut(&connection)
            .ok_or(WorldError::UnknownConnection(connection))?;
        player.set_follow(Some(entity));
        debug!(%connection, %entity, "Camera follows entity");
        self.point_camera(connection, Camera::new(dimension, center))
    }

    /// Toggle one of the player's sight tags and re-push its view
    pub fn set_player_sight_tag(&mut self, connection: ConnectionId, tag: &str, enabled: bool) -> WorldResult<bool> {
        let WorldState {
            registries,
            config,
            dimensions,
            entities,
            players,
            ..
        } = self;
        let player = players
            .get_mut(&connection)
            .ok_or(WorldError::UnknownConnection(connection))?;
        if !player.viewers_mut().sight.tags_mut().set(tag, enabled) {
            return Ok(false);
        }
        if let Some(camera) = player.camera() {
            let dimension = dimensions
                .get(&camera.dimension)
                .ok_or(WorldError::UnknownDimension(camera.dimension))?;
            let ctx = SyncContext::new(&dimension.tree, &registries.transitions, entities, config);
            player.resync(&ctx);
        }
        Ok(true)
    }

    /// Move within the camera's dimension, or flush and reattach when the
    /// dimension differs
    fn point_camera(&mut self, connection: ConnectionId, camera: Camera) -> WorldResult<SyncReport> {
        let WorldState {
            registries,
            config,
            dimensions,
            entities,
            players,
            ..
        } = self;
        let player = players
            .get_mut(&connection)
            .ok_or(WorldError::UnknownConnection(connection))?;
        let previous = player.camera().map(|camera| camera.dimension);

        if previous == Some(camera.dimension) {
            let dimension = dimensions
                .get(&camera.dimension)
                .ok_or(WorldError::UnknownDimension(camera.dimension))?;
            let ctx = SyncContext::new(&dimension.tree, &registries.transitions, entities, config);
            return Ok(player.move_camera(camera.center, &ctx));
        }

        if let Some(old) = previous.and_then(|id| dimensions.get_mut(&id)) {
            old.sync.unregister(connection);
        }
        let dimension = dimensions
            .get_mut(&camera.dimension)
            .ok_or(WorldError::UnknownDimension(camera.dimension))?;
        dimension.sync.register(connection);
        let ctx = SyncContext::new(&dimension.tree, &registries.transitions, entities, config);
        Ok(player.reattach(camera, &ctx))
    }

    // ========================================================================
    // Collision
    // ========================================================================

    /// True if a solid tile on a layer `collision` can see, or an entity
    /// `collision` can see, occupies `coordinate`
    pub fn is_blocked(&self, dimension: DimensionId, coordinate: Coordinate, collision: &Viewer) -> WorldResult<bool> {
        let dim = self.require_dimension(dimension)?;
        let tile_blocked = dim
            .tree
            .layers()
            .iter()
            .filter(|layer| collision.can_view_layer(layer))
            .any(|layer| layer.resolved_stack(coordinate).iter().any(|tile| self.registries.is_solid(tile)));
        if tile_blocked {
            return Ok(true);
        }
        Ok(self
            .entities
            .nearby(dimension, coordinate, 0, 0)
            .into_iter()
            .any(|entity| collision.can_view_entity(entity)))
    }
}
