//! Per-dimension watcher registry and event fan-out.

use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use super::{ConnectionId, PlayerSyncManager, SyncContext, WatchChange};
use crate::coords::ChunkWindow;
use crate::entity::{Entity, NetworkId};
use crate::wire::Packet;
use crate::world::DimensionId;

/// Connections whose camera is attached to one dimension
#[derive(Debug, Clone)]
pub struct DimensionSyncManager {
    dimension: DimensionId,
    watchers: BTreeSet<ConnectionId>,
}

impl DimensionSyncManager {
    pub fn new(dimension: DimensionId) -> Self {
        Self {
            dimension,
            watchers: BTreeSet::new(),
        }
    }

    pub fn dimension(&self) -> DimensionId {
        self.dimension
    }

    /// Returns true if newly registered
    pub fn register(&mut self, connection: ConnectionId) -> bool {
        self.watchers.insert(connection)
    }

    pub fn unregister(&mut self, connection: ConnectionId) -> bool {
        self.watchers.remove(&connection)
    }

    pub fn watchers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.watchers.iter().copied()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    fn watching<'p>(
        &'p self,
        players: &'p mut BTreeMap<ConnectionId, PlayerSyncManager>,
    ) -> impl Iterator<Item = &'p mut PlayerSyncManager> + 'p {
        players
            .iter_mut()
            .filter(|(connection, _)| self.watchers.contains(*connection))
            .map(|(_, player)| player)
    }

    /// Refresh every watcher's view of `entity`; watchers that already had
    /// it synced receive `packet`, the others get create/delete (or nothing)
    fn fan_out(
        &self,
        players: &mut BTreeMap<ConnectionId, PlayerSyncManager>,
        entity: &Entity,
        packet: Packet,
        ctx: &SyncContext<'_>,
    ) -> usize {
        let Some(network_id) = entity.network_id else {
            return 0;
        };
        let mut forwarded = 0;
        for player in self.watching(players) {
            if player.refresh_entity(entity, ctx) == WatchChange::Watching
                && player.forward_entity_packet(network_id, packet.clone())
            {
                forwarded += 1;
            }
        }
        trace!(dimension = %self.dimension, entity = %network_id, packet = packet.name(), forwarded, "Entity update fanned out");
        forwarded
    }

    pub fn entity_moved(
        &self,
        players: &mut BTreeMap<ConnectionId, PlayerSyncManager>,
        entity: &Entity,
        packet: Packet,
        ctx: &SyncContext<'_>,
    ) -> usize {
        self.fan_out(players, entity, packet, ctx)
    }

    pub fn entity_teleported(
        &self,
        players: &mut BTreeMap<ConnectionId, PlayerSyncManager>,
        entity: &Entity,
        packet: Packet,
        ctx: &SyncContext<'_>,
    ) -> usize {
        self.fan_out(players, entity, packet, ctx)
    }

    pub fn entity_turned(
        &self,
        players: &mut BTreeMap<ConnectionId, PlayerSyncManager>,
        entity: &Entity,
        packet: Packet,
        ctx: &SyncContext<'_>,
    ) -> usize {
        self.fan_out(players, entity, packet, ctx)
    }

    /// New entity in this dimension: watchers that can see it get a create
    pub fn entity_spawned(
        &self,
        players: &mut BTreeMap<ConnectionId, PlayerSyncManager>,
        entity: &Entity,
        ctx: &SyncContext<'_>,
    ) -> usize {
        self.watching(players)
            .map(|player| player.refresh_entity(entity, ctx))
            .filter(|change| *change == WatchChange::Entered)
            .count()
    }

    /// Entity left this dimension: every watcher that had it gets a delete
    pub fn entity_despawned(
        &self,
        players: &mut BTreeMap<ConnectionId, PlayerSyncManager>,
        network_id: NetworkId,
    ) -> usize {
        self.watching(players)
            .map(|player| player.forget_entity(network_id))
            .filter(|forgotten| *forgotten)
            .count()
    }

    /// Re-push stale windows to every watcher that has them synced
    pub fn tiles_changed(
        &self,
        players: &mut BTreeMap<ConnectionId, PlayerSyncManager>,
        windows: &[ChunkWindow],
        ctx: &SyncContext<'_>,
    ) -> usize {
        if windows.is_empty() {
            return 0;
        }
        self.watching(players)
            .map(|player| player.repush_windows(windows, ctx))
            .sum()
    }

    /// Re-push everything each watcher has synced (layer tag toggles)
    pub fn resync_all(
        &self,
        players: &mut BTreeMap<ConnectionId, PlayerSyncManager>,
        ctx: &SyncContext<'_>,
    ) {
        for player in self.watching(players) {
            player.resync(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;
    use crate::coords::Coordinate;
    use crate::entity::EntityManager;
    use crate::sync::{Camera, RecordingSink};
    use crate::transition::TransitionRegistry;
    use crate::tree::MapTree;
    use crate::viewer::{TagSet, Viewer, ViewerPair};
    use crate::wire::MoveEntityPacket;

    const DIM: DimensionId = DimensionId(1);

    fn move_packet(id: NetworkId, end: Coordinate) -> Packet {
        Packet::MoveEntity(MoveEntityPacket {
            network_id: id,
            start: Coordinate::new(0, 0, 0),
            end,
            facing: 0.0,
            duration: 0.25,
        })
    }

    #[test]
    fn test_move_forwarded_only_to_watchers_that_see_entity() {
        let tree = MapTree::new();
        let transitions = TransitionRegistry::new();
        let mut entities = EntityManager::new();
        let config = WorldConfig::default();
        let id = entities.spawn(Entity::new(1, DIM, Coordinate::new(0, 0, 0)));

        let mut sync = DimensionSyncManager::new(DIM);
        let mut players = BTreeMap::new();
        let plain = RecordingSink::new();
        let blind = RecordingSink::new();
        let outsider = RecordingSink::new();
        {
            let ctx = SyncContext::new(&tree, &transitions, &entities, &config);
            for (n, sink, tags) in [
                (1, &plain, TagSet::default()),
                (2, &blind, TagSet::from_tags(["other"])),
                (3, &outsider, TagSet::default()),
            ] {
                let viewers = ViewerPair {
                    sight: Viewer::sight(tags),
                    ..ViewerPair::default()
                };
                let mut player = PlayerSyncManager::new(ConnectionId(n), Box::new(sink.clone())).with_viewers(viewers);
                player.attach(Camera::new(DIM, Coordinate::new(0, 0, 0)));
                player.update(&ctx);
                players.insert(ConnectionId(n), player);
                if n != 3 {
                    sync.register(ConnectionId(n));
                }
                sink.take();
            }
        }

        entities.get_mut(id).unwrap().coordinate = Coordinate::new(1, 0, 0);
        let entity = entities.get(id).unwrap().clone();
        let ctx = SyncContext::new(&tree, &transitions, &entities, &config);
        let forwarded = sync.entity_moved(&mut players, &entity, move_packet(id, entity.coordinate), &ctx);

        assert_eq!(forwarded, 1);
        assert_eq!(plain.take().len(), 1);
        assert!(blind.is_empty());
        assert!(outsider.is_empty());
    }

    #[test]
    fn test_despawn_deletes_once_per_watcher() {
        let tree = MapTree::new();
        let transitions = TransitionRegistry::new();
        let mut entities = EntityManager::new();
        let config = WorldConfig::default();
        let id = entities.spawn(Entity::new(1, DIM, Coordinate::new(0, 0, 0)));

        let mut sync = DimensionSyncManager::new(DIM);
        let mut players = BTreeMap::new();
        let sink = RecordingSink::new();
        let ctx = SyncContext::new(&tree, &transitions, &entities, &config);
        let mut player = PlayerSyncManager::new(ConnectionId(1), Box::new(sink.clone()));
        player.attach(Camera::new(DIM, Coordinate::new(0, 0, 0)));
        player.update(&ctx);
        players.insert(ConnectionId(1), player);
        sync.register(ConnectionId(1));
        sink.take();

        assert_eq!(sync.entity_despawned(&mut players, id), 1);
        assert_eq!(sync.entity_despawned(&mut players, id), 0);
        assert_eq!(sink.take().len(), 1);
    }
}
