//! Entity operations on the world façade. Each one updates the entity
//! manager first, then lets followers' cameras catch up, then fans the
//! change out to the dimension's watchers.

use tracing::debug;

use super::{DimensionId, WorldState};
use crate::coords::Coordinate;
use crate::entity::{Entity, NetworkId, TransientId};
use crate::error::{WorldError, WorldResult};
use crate::sync::{Camera, SyncContext};
use crate::wire::{MoveEntityPacket, Packet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityEvent {
    Moved,
    Teleported,
    Turned,
}

impl WorldState {
    fn build_entity(&self, dimension: DimensionId, name: &str, coordinate: Coordinate) -> WorldResult<Entity> {
        self.require_dimension(dimension)?;
        let definition_id = self.registries.entity_id(name)?;
        Ok(match self.registries.entity_definition(definition_id) {
            Some(definition) => Entity::from_definition(definition_id, definition, dimension, coordinate),
            None => Entity::new(definition_id, dimension, coordinate),
        })
    }

    /// Spawn a network-synced entity; watchers that can see it get a create
    pub fn spawn_entity(&mut self, dimension: DimensionId, name: &str, coordinate: Coordinate) -> WorldResult<NetworkId> {
        let entity = self.build_entity(dimension, name, coordinate)?;
        let id = self.entities.spawn(entity);

        let WorldState {
            registries,
            config,
            dimensions,
            entities,
            players,
            ..
        } = self;
        let dim = dimensions.get(&dimension).ok_or(WorldError::UnknownDimension(dimension))?;
        let entities = &*entities;
        let entity = entities.get(id).ok_or(WorldError::UnknownEntity(id))?;
        let ctx = SyncContext::new(&dim.tree, &registries.transitions, entities, config);
        let created = dim.sync.entity_spawned(players, entity, &ctx);
        debug!(entity = %id, name, %dimension, %coordinate, created, "Entity spawned");
        Ok(id)
    }

    /// Server-side only entity: never indexed, never synced
    pub fn spawn_transient_entity(&mut self, dimension: DimensionId, name: &str, coordinate: Coordinate) -> WorldResult<TransientId> {
        let entity = self.build_entity(dimension, name, coordinate)?;
        Ok(self.entities.spawn_transient(entity))
    }

    /// One-step move animated over `move_duration_secs`
    pub fn move_entity(&mut self, id: NetworkId, target: Coordinate, facing: Option<f32>) -> WorldResult<usize> {
        let duration = self.config.move_duration_secs;
        self.relocate(id, target, facing, duration, EntityEvent::Moved)
    }

    /// Instant relocation within the entity's dimension
    pub fn teleport_entity(&mut self, id: NetworkId, target: Coordinate) -> WorldResult<usize> {
        self.relocate(id, target, None, 0.0, EntityEvent::Teleported)
    }

    pub fn turn_entity(&mut self, id: NetworkId, facing: f32) -> WorldResult<usize> {
        let coordinate = self.entities.get(id).ok_or(WorldError::UnknownEntity(id))?.coordinate;
        self.relocate(id, coordinate, Some(facing), 0.0, EntityEvent::Turned)
    }

    fn relocate(
        &mut self,
        id: NetworkId,
        target: Coordinate,
        facing: Option<f32>,
        duration: f32,
        event: EntityEvent,
    ) -> WorldResult<usize> {
        let entity = self.entities.get_mut(id).ok_or(WorldError::UnknownEntity(id))?;
        let start = entity.coordinate;
        entity.coordinate = target;
        if let Some(facing) = facing {
            entity.facing = facing;
        }
        let packet = Packet::MoveEntity(MoveEntityPacket {
            network_id: id,
            start,
            end: target,
            facing: entity.facing,
            duration,
        });
        self.entity_changed(id, packet, event)
    }

    fn entity_changed(&mut self, id: NetworkId, packet: Packet, event: EntityEvent) -> WorldResult<usize> {
        let WorldState {
            registries,
            config,
            dimensions,
            entities,
            players,
            ..
        } = self;
        let entities = &*entities;
        let entity = entities.get(id).ok_or(WorldError::UnknownEntity(id))?;
        let dimension_id = entity.dimension.ok_or(WorldError::UnknownEntity(id))?;
        let dimension = dimensions
            .get(&dimension_id)
            .ok_or(WorldError::UnknownDimension(dimension_id))?;
        let ctx = SyncContext::new(&dimension.tree, &registries.transitions, entities, config);

        // Followers first, so the entity stays inside their fresh range
        for player in players.values_mut().filter(|player| player.follow() == Some(id)) {
            if player.camera().map(|camera| camera.dimension) == Some(dimension_id) {
                player.move_camera(entity.coordinate, &ctx);
            }
        }

        let forwarded = match event {
            EntityEvent::Moved => dimension.sync.entity_moved(players, entity, packet, &ctx),
            EntityEvent::Teleported => dimension.sync.entity_teleported(players, entity, packet, &ctx),
            EntityEvent::Turned => dimension.sync.entity_turned(players, entity, packet, &ctx),
        };
        Ok(forwarded)
    }

    /// Move an entity to another dimension. Old watchers get a delete,
    /// followers are flushed and reattached, new watchers get a create.
    pub fn change_dimension(&mut self, id: NetworkId, dimension: DimensionId, coordinate: Coordinate) -> WorldResult<()> {
        self.require_dimension(dimension)?;
        let entity = self.entities.get_mut(id).ok_or(WorldError::UnknownEntity(id))?;
        let previous = entity.dimension;
        entity.dimension = Some(dimension);
        entity.coordinate = coordinate;

        if let Some(old) = previous.and_then(|old| self.dimensions.get(&old)) {
            old.sync.entity_despawned(&mut self.players, id);
        }

        let followers: Vec<_> = self
            .players
            .values()
            .filter(|player| player.follow() == Some(id))
            .map(|player| player.connection())
            .collect();
        for connection in followers {
            self.point_camera(connection, Camera::new(dimension, coordinate))?;
        }

        let WorldState {
            registries,
            config,
            dimensions,
            entities,
            players,
            ..
        } = self;
        let entities = &*entities;
        let dim = dimensions.get(&dimension).ok_or(WorldError::UnknownDimension(dimension))?;
        let entity = entities.get(id).ok_or(WorldError::UnknownEntity(id))?;
        let ctx = SyncContext::new(&dim.tree, &registries.transitions, entities, config);
        dim.sync.entity_spawned(players, entity, &ctx);
        debug!(entity = %id, from = ?previous, to = %dimension, %coordinate, "Entity changed dimension");
        Ok(())
    }

    /// Remove an entity; every watcher that had it synced gets one delete.
    /// Followers keep their camera where it was.
    pub fn despawn_entity(&mut self, id: NetworkId) -> WorldResult<Entity> {
        let entity = self.entities.get(id).ok_or(WorldError::UnknownEntity(id))?;
        if let Some(dimension) = entity.dimension.and_then(|dimension| self.dimensions.get(&dimension)) {
            dimension.sync.entity_despawned(&mut self.players, id);
        }
        for player in self.players.values_mut().filter(|player| player.follow() == Some(id)) {
            player.set_follow(None);
        }
        self.entities.despawn(id).ok_or(WorldError::UnknownEntity(id))
    }
}
