//! Per-Client Synchronization
//!
//! Interest management in two levels:
//! - `PlayerSyncManager` (one per connection): records which windows and
//!   entities the client has been told about and diffs against that record
//!   as the camera moves or the world changes
//! - `DimensionSyncManager` (one per dimension): knows which connections
//!   watch the dimension and fans entity/tile events out to them
//!
//! The sent sets are the single source of truth. Every membership change
//! emits exactly one packet: insert → create, remove → delete.

mod dimension;
mod player;

pub use dimension::DimensionSyncManager;
pub use player::{PlayerSyncManager, SyncPhase, SyncReport, WatchChange};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::WorldConfig;
use crate::constants::SYNC_CHUNK_SIZE;
use crate::coords::Coordinate;
use crate::entity::EntityManager;
use crate::transition::TransitionRegistry;
use crate::tree::MapTree;
use crate::view::ChunkViewManager;
use crate::wire::Packet;
use crate::world::DimensionId;

/// Transport-assigned connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound packet path of one connection. Must never block.
pub trait PacketSink: Send + Sync {
    fn send(&mut self, packet: Packet);
}

impl PacketSink for Vec<Packet> {
    fn send(&mut self, packet: Packet) {
        self.push(packet);
    }
}

/// Sink that keeps every packet for later inspection; clones share storage
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    packets: Arc<Mutex<Vec<Packet>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every packet recorded so far
    pub fn take(&self) -> Vec<Packet> {
        std::mem::take(&mut *self.packets.lock())
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }
}

impl PacketSink for RecordingSink {
    fn send(&mut self, packet: Packet) {
        self.packets.lock().push(packet);
    }
}

/// Where a client is looking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    pub dimension: DimensionId,
    pub center: Coordinate,
}

impl Camera {
    pub fn new(dimension: DimensionId, center: Coordinate) -> Self {
        Self { dimension, center }
    }
}

/// Read-only dimension state a sync pass needs
#[derive(Clone, Copy)]
pub struct SyncContext<'a> {
    pub tree: &'a MapTree,
    pub transitions: &'a TransitionRegistry,
    pub entities: &'a EntityManager,
    pub config: &'a WorldConfig,
}

impl<'a> SyncContext<'a> {
    pub fn new(
        tree: &'a MapTree,
        transitions: &'a TransitionRegistry,
        entities: &'a EntityManager,
        config: &'a WorldConfig,
    ) -> Self {
        Self {
            tree,
            transitions,
            entities,
            config,
        }
    }

    pub fn views(&self) -> ChunkViewManager<'a> {
        ChunkViewManager::new(self.transitions)
    }

    /// Horizontal entity watch range in tiles
    pub fn entity_range(&self) -> i32 {
        self.config.sync_range * SYNC_CHUNK_SIZE + self.config.entity_range_padding
    }
}
