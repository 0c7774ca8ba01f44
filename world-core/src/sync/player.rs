//! Per-connection sync state machine.
//!
//! ```text
//! Unsynced --attach--> InitialSync --update--> Steady
//!    ^                                           |
//!    +------------------detach-------------------+
//! ```

use std::collections::HashSet;
use tracing::{debug, trace, warn};

use super::{Camera, ConnectionId, PacketSink, SyncContext};
use crate::constants::SYNC_CHUNK_SIZE;
use crate::coords::{ChunkWindow, Coordinate};
use crate::entity::{Entity, NetworkId};
use crate::error::WireError;
use crate::view::{ChunkViewManager, ScopedView};
use crate::viewer::{Viewer, ViewerPair};
use crate::wire::{Packet, RemoveEntityPacket, RemoveMapChunkPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No camera, nothing synced
    Unsynced,
    /// Camera attached, first fill pending
    InitialSync,
    /// Diffing against the sent sets
    Steady,
}

/// Outcome of re-evaluating one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchChange {
    /// Became visible: a create packet was sent
    Entered,
    /// Stopped being visible: a delete packet was sent
    Left,
    /// Still synced; the caller may forward update packets
    Watching,
    /// Not synced before or after
    Ignored,
}

/// Membership transitions performed by one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub chunks_added: usize,
    pub chunks_removed: usize,
    pub entities_added: usize,
    pub entities_removed: usize,
    /// In range but too large for one frame; not synced
    pub chunks_refused: usize,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        *self == SyncReport::default()
    }
}

pub struct PlayerSyncManager {
    connection: ConnectionId,
    viewers: ViewerPair,
    camera: Option<Camera>,
    follow: Option<NetworkId>,
    synced_chunks: HashSet<ChunkWindow>,
    /// In-range windows whose packet did not fit a frame; retried when they
    /// go stale again
    refused_chunks: HashSet<ChunkWindow>,
    synced_entities: HashSet<NetworkId>,
    phase: SyncPhase,
    sink: Box<dyn PacketSink>,
}

impl std::fmt::Debug for PlayerSyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSyncManager")
            .field("connection", &self.connection)
            .field("camera", &self.camera)
            .field("follow", &self.follow)
            .field("synced_chunks", &self.synced_chunks.len())
            .field("refused_chunks", &self.refused_chunks.len())
            .field("synced_entities", &self.synced_entities.len())
            .field("phase", &self.phase)
            .finish()
    }
}

impl PlayerSyncManager {
    pub fn new(connection: ConnectionId, sink: Box<dyn PacketSink>) -> Self {
        Self {
            connection,
            viewers: ViewerPair::default(),
            camera: None,
            follow: None,
            synced_chunks: HashSet::new(),
            refused_chunks: HashSet::new(),
            synced_entities: HashSet::new(),
            phase: SyncPhase::Unsynced,
            sink,
        }
    }

    pub fn with_viewers(mut self, viewers: ViewerPair) -> Self {
        self.viewers = viewers;
        self
    }

    // --- accessors ---

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn camera(&self) -> Option<Camera> {
        self.camera
    }

    pub fn sight(&self) -> &Viewer {
        &self.viewers.sight
    }

    pub fn collision(&self) -> &Viewer {
        &self.viewers.collision
    }

    /// Tag changes take effect on the next `resync`
    pub fn viewers_mut(&mut self) -> &mut ViewerPair {
        &mut self.viewers
    }

    pub fn follow(&self) -> Option<NetworkId> {
        self.follow
    }

    pub fn set_follow(&mut self, entity: Option<NetworkId>) {
        self.follow = entity;
    }

    pub fn is_chunk_synced(&self, window: &ChunkWindow) -> bool {
        self.synced_chunks.contains(window)
    }

    pub fn is_chunk_refused(&self, window: &ChunkWindow) -> bool {
        self.refused_chunks.contains(window)
    }

    pub fn is_entity_synced(&self, id: NetworkId) -> bool {
        self.synced_entities.contains(&id)
    }

    /// Synced windows, sorted
    pub fn synced_chunks(&self) -> Vec<ChunkWindow> {
        let mut windows: Vec<_> = self.synced_chunks.iter().copied().collect();
        windows.sort();
        windows
    }

    /// Synced entity ids, sorted
    pub fn synced_entities(&self) -> Vec<NetworkId> {
        let mut ids: Vec<_> = self.synced_entities.iter().copied().collect();
        ids.sort();
        ids
    }

    // ========================================================================
    // Membership helpers: the only code that touches the sent sets
    // ========================================================================

    /// A window only joins the sent set once its packet is known to fit a
    /// frame; a refused window is remembered instead
    fn sync_chunk(&mut self, view: &ScopedView) -> Result<bool, WireError> {
        let window = view.window();
        if self.synced_chunks.contains(&window) {
            return Ok(false);
        }
        match ChunkViewManager::to_packet(view) {
            Ok(packet) => {
                self.refused_chunks.remove(&window);
                self.synced_chunks.insert(window);
                self.sink.send(Packet::MapChunk(packet));
                Ok(true)
            }
            Err(e) => {
                if self.refused_chunks.insert(window) {
                    warn!(connection = %self.connection, %window, error = %e, "Window refused");
                }
                Err(e)
            }
        }
    }

    fn unsync_chunk(&mut self, window: ChunkWindow) -> bool {
        if !self.synced_chunks.remove(&window) {
            return false;
        }
        self.sink.send(Packet::RemoveMapChunk(RemoveMapChunkPacket { window }));
        true
    }

    fn sync_entity(&mut self, entity: &Entity) -> bool {
        let Some(packet) = entity.to_packet() else {
            return false;
        };
        if !self.synced_entities.insert(packet.network_id) {
            return false;
        }
        self.sink.send(Packet::Entity(packet));
        true
    }

    fn unsync_entity(&mut self, network_id: NetworkId) -> bool {
        if !self.synced_entities.remove(&network_id) {
            return false;
        }
        self.sink.send(Packet::RemoveEntity(RemoveEntityPacket { network_id }));
        true
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Point the camera at a dimension. A camera already attached elsewhere
    /// is detached (flushed) first.
    pub fn attach(&mut self, camera: Camera) {
        if self.phase != SyncPhase::Unsynced {
            self.detach();
        }
        self.camera = Some(camera);
        self.phase = SyncPhase::InitialSync;
        debug!(connection = %self.connection, dimension = %camera.dimension, center = %camera.center, "Camera attached");
    }

    /// Initial fill, or a camera-move diff in steady state
    pub fn update(&mut self, ctx: &SyncContext<'_>) -> SyncReport {
        let Some(camera) = self.camera else {
            return SyncReport::default();
        };
        let mut report = SyncReport::default();
        let range = ctx.config.sync_range;
        let vertical = ctx.config.sync_vertical_range;

        if self.phase == SyncPhase::Steady {
            let mut stale: Vec<ChunkWindow> = self
                .synced_chunks
                .iter()
                .filter(|window| !window.is_within_range(camera.center, range, vertical, SYNC_CHUNK_SIZE))
                .copied()
                .collect();
            stale.sort();
            for window in stale {
                if self.unsync_chunk(window) {
                    report.chunks_removed += 1;
                }
            }
            self.refused_chunks
                .retain(|window| window.is_within_range(camera.center, range, vertical, SYNC_CHUNK_SIZE));
        }

        let missing: Vec<ChunkWindow> = ChunkWindow::around(camera.center, range, vertical, SYNC_CHUNK_SIZE)
            .into_iter()
            .filter(|window| !self.synced_chunks.contains(window) && !self.refused_chunks.contains(window))
            .collect();
        if !missing.is_empty() {
            let views = ctx.views().materialize_many(ctx.tree, &self.viewers.sight, &missing);
            for view in &views {
                match self.sync_chunk(view) {
                    Ok(true) => report.chunks_added += 1,
                    Ok(false) => {}
                    Err(_) => report.chunks_refused += 1,
                }
            }
        }

        let (added, removed) = self.scan_entities(camera, ctx);
        report.entities_added += added;
        report.entities_removed += removed;

        if self.phase == SyncPhase::InitialSync {
            self.phase = SyncPhase::Steady;
            debug!(
                connection = %self.connection,
                chunks = report.chunks_added,
                entities = report.entities_added,
                "Initial sync complete"
            );
        } else if !report.is_empty() {
            trace!(connection = %self.connection, ?report, "Sync diff");
        }
        report
    }

    /// Move the camera; diffs immediately once steady
    pub fn move_camera(&mut self, center: Coordinate, ctx: &SyncContext<'_>) -> SyncReport {
        let Some(camera) = self.camera.as_mut() else {
            return SyncReport::default();
        };
        camera.center = center;
        if self.phase == SyncPhase::Steady {
            self.update(ctx)
        } else {
            SyncReport::default()
        }
    }

    fn should_watch(&self, camera: Camera, entity: &Entity, ctx: &SyncContext<'_>) -> bool {
        entity.network_id.is_some()
            && entity.dimension == Some(camera.dimension)
            && entity.coordinate.horizontal_distance(&camera.center) <= ctx.entity_range()
            && (entity.coordinate.z - camera.center.z).abs() <= ctx.config.sync_vertical_range
            && self.viewers.sight.can_view_entity(entity)
    }

    /// Nearby-entity scan: drop what left, add what entered
    fn scan_entities(&mut self, camera: Camera, ctx: &SyncContext<'_>) -> (usize, usize) {
        let visible: Vec<&Entity> = ctx
            .entities
            .nearby(camera.dimension, camera.center, ctx.entity_range(), ctx.config.sync_vertical_range)
            .into_iter()
            .filter(|entity| self.viewers.sight.can_view_entity(entity))
            .collect();
        let visible_ids: HashSet<NetworkId> = visible.iter().filter_map(|entity| entity.network_id).collect();

        let mut gone: Vec<NetworkId> = self
            .synced_entities
            .iter()
            .filter(|id| !visible_ids.contains(*id))
            .copied()
            .collect();
        gone.sort();
        let removed = gone.into_iter().filter(|id| self.unsync_entity(*id)).count();
        let added = visible.into_iter().filter(|entity| self.sync_entity(entity)).count();
        (added, removed)
    }

    /// Re-evaluate visibility of one entity, sending create/delete as needed
    pub fn refresh_entity(&mut self, entity: &Entity, ctx: &SyncContext<'_>) -> WatchChange {
        let Some(network_id) = entity.network_id else {
            return WatchChange::Ignored;
        };
        let should = match self.camera {
            Some(camera) if self.phase == SyncPhase::Steady => self.should_watch(camera, entity, ctx),
            _ => false,
        };
        let synced = self.synced_entities.contains(&network_id);
        match (should, synced) {
            (true, false) => {
                self.sync_entity(entity);
                WatchChange::Entered
            }
            (false, true) => {
                self.unsync_entity(network_id);
                WatchChange::Left
            }
            (true, true) => WatchChange::Watching,
            (false, false) => WatchChange::Ignored,
        }
    }

    /// Entity left the world; delete it if synced
    pub fn forget_entity(&mut self, network_id: NetworkId) -> bool {
        self.unsync_entity(network_id)
    }

    /// Send an update packet only if the entity is already synced
    pub fn forward_entity_packet(&mut self, network_id: NetworkId, packet: Packet) -> bool {
        if !self.synced_entities.contains(&network_id) {
            return false;
        }
        self.sink.send(packet);
        true
    }

    /// Re-materialize and resend every listed window that is currently
    /// synced. Overwrites on the client; membership is unchanged unless the
    /// window no longer fits a frame (it is removed) or a previously refused
    /// window now fits (it is added). Returns the number of chunks sent.
    pub fn repush_windows(&mut self, windows: &[ChunkWindow], ctx: &SyncContext<'_>) -> usize {
        let stale: Vec<ChunkWindow> = windows
            .iter()
            .filter(|window| self.synced_chunks.contains(*window) || self.refused_chunks.contains(*window))
            .copied()
            .collect();
        if stale.is_empty() {
            return 0;
        }
        let views = ctx.views().materialize_many(ctx.tree, &self.viewers.sight, &stale);
        let mut sent = 0;
        for view in &views {
            let window = view.window();
            if !self.synced_chunks.contains(&window) {
                if let Ok(true) = self.sync_chunk(view) {
                    sent += 1;
                }
                continue;
            }
            match ChunkViewManager::to_packet(view) {
                Ok(packet) => {
                    self.sink.send(Packet::MapChunk(packet));
                    sent += 1;
                }
                Err(e) => {
                    warn!(connection = %self.connection, %window, error = %e, "Synced window outgrew a frame");
                    self.unsync_chunk(window);
                    self.refused_chunks.insert(window);
                }
            }
        }
        trace!(connection = %self.connection, windows = sent, "Re-pushed stale windows");
        sent
    }

    /// Re-push every synced or refused window and re-scan entities (after
    /// tag changes)
    pub fn resync(&mut self, ctx: &SyncContext<'_>) -> SyncReport {
        let mut windows = self.synced_chunks();
        windows.extend(self.refused_chunks.iter().copied());
        self.repush_windows(&windows, ctx);
        match self.camera {
            Some(camera) if self.phase == SyncPhase::Steady => {
                let (entities_added, entities_removed) = self.scan_entities(camera, ctx);
                SyncReport {
                    entities_added,
                    entities_removed,
                    ..SyncReport::default()
                }
            }
            _ => SyncReport::default(),
        }
    }

    /// Delete everything synced and drop the camera
    pub fn detach(&mut self) -> SyncReport {
        let mut report = SyncReport::default();
        for window in self.synced_chunks() {
            if self.unsync_chunk(window) {
                report.chunks_removed += 1;
            }
        }
        for id in self.synced_entities() {
            if self.unsync_entity(id) {
                report.entities_removed += 1;
            }
        }
        self.refused_chunks.clear();
        if let Some(camera) = self.camera.take() {
            debug!(connection = %self.connection, dimension = %camera.dimension, ?report, "Camera detached");
        }
        self.phase = SyncPhase::Unsynced;
        report
    }

    /// Flush, attach to `camera`, and run initial sync against `ctx`
    pub fn reattach(&mut self, camera: Camera, ctx: &SyncContext<'_>) -> SyncReport {
        let flushed = self.detach();
        self.attach(camera);
        let filled = self.update(ctx);
        SyncReport {
            chunks_removed: flushed.chunks_removed,
            entities_removed: flushed.entities_removed,
            ..filled
        }
    }
}
