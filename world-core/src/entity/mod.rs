//! Entities (sync-relevant state only)
//!
//! Gameplay logic lives outside this crate; here an entity is a network id,
//! a position, a facing, a dimension, its tag sets and a bag of dynamic
//! JSON components shipped to clients on creation.
//!
//! Transient entities carry no network id: they are stored apart from the
//! id-indexed table and are never synced.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

use crate::coords::Coordinate;
use crate::registry::EntityDefinition;
use crate::viewer::{TagSet, Tagged};
use crate::wire::EntityPacket;
use crate::world::DimensionId;

/// Server-assigned, monotonic entity id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkId(pub u32);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a transient entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransientId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// `None` for transient entities
    pub network_id: Option<NetworkId>,
    /// Entity definition id from the registry
    pub definition: u32,
    pub coordinate: Coordinate,
    pub facing: f32,
    /// `None` once despawned
    pub dimension: Option<DimensionId>,
    pub visibility_tags: TagSet,
    pub collision_tags: TagSet,
    pub components: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(definition: u32, dimension: DimensionId, coordinate: Coordinate) -> Self {
        Self {
            network_id: None,
            definition,
            coordinate,
            facing: 0.0,
            dimension: Some(dimension),
            visibility_tags: TagSet::default(),
            collision_tags: TagSet::default(),
            components: BTreeMap::new(),
        }
    }

    /// Copy tags and initial components from a definition
    pub fn from_definition(
        definition_id: u32,
        definition: &EntityDefinition,
        dimension: DimensionId,
        coordinate: Coordinate,
    ) -> Self {
        Self {
            visibility_tags: definition.visibility_tags.clone(),
            collision_tags: definition.collision_tags.clone(),
            components: definition.components.clone(),
            ..Self::new(definition_id, dimension, coordinate)
        }
    }

    pub fn is_transient(&self) -> bool {
        self.network_id.is_none()
    }

    pub fn is_spawned(&self) -> bool {
        self.dimension.is_some()
    }

    /// Creation packet; `None` for transient entities
    pub fn to_packet(&self) -> Option<EntityPacket> {
        let network_id = self.network_id?;
        Some(EntityPacket {
            network_id,
            entity_id: self.definition,
            coordinate: self.coordinate,
            facing: self.facing,
            components: self
                .components
                .iter()
                .map(|(key, value)| (key.clone(), value.to_string()))
                .collect(),
        })
    }
}

impl Tagged for Entity {
    fn visibility_tags(&self) -> &TagSet {
        &self.visibility_tags
    }

    fn collision_tags(&self) -> &TagSet {
        &self.collision_tags
    }
}

/// Owns every entity; hands out network ids
#[derive(Debug, Default)]
pub struct EntityManager {
    next_id: u32,
    entities: HashMap<NetworkId, Entity>,
    next_transient: u32,
    transient: HashMap<TransientId, Entity>,
}

impl EntityManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next network id and index the entity
    pub fn spawn(&mut self, mut entity: Entity) -> NetworkId {
        self.next_id += 1;
        let id = NetworkId(self.next_id);
        entity.network_id = Some(id);
        debug!(network_id = %id, coordinate = %entity.coordinate, "Entity spawned");
        self.entities.insert(id, entity);
        id
    }

    /// Store without a network id
    pub fn spawn_transient(&mut self, mut entity: Entity) -> TransientId {
        self.next_transient += 1;
        let id = TransientId(self.next_transient);
        entity.network_id = None;
        self.transient.insert(id, entity);
        id
    }

    pub fn get(&self, id: NetworkId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: NetworkId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn transient(&self, id: TransientId) -> Option<&Entity> {
        self.transient.get(&id)
    }

    pub fn transient_mut(&mut self, id: TransientId) -> Option<&mut Entity> {
        self.transient.get_mut(&id)
    }

    pub fn despawn_transient(&mut self, id: TransientId) -> Option<Entity> {
        self.transient.remove(&id)
    }

    /// Remove and return the entity with its dimension cleared
    pub fn despawn(&mut self, id: NetworkId) -> Option<Entity> {
        let mut entity = self.entities.remove(&id)?;
        entity.dimension = None;
        debug!(network_id = %id, "Entity despawned");
        Some(entity)
    }

    /// Network-synced entities in `dimension`, ordered by id
    pub fn in_dimension(&self, dimension: DimensionId) -> Vec<&Entity> {
        let mut found: Vec<&Entity> = self
            .entities
            .values()
            .filter(|entity| entity.dimension == Some(dimension))
            .collect();
        found.sort_by_key(|entity| entity.network_id);
        found
    }

    /// Entities within `range` tiles horizontally and `vertical_range`
    /// levels of `center`, ordered by id
    pub fn nearby(&self, dimension: DimensionId, center: Coordinate, range: i32, vertical_range: i32) -> Vec<&Entity> {
        self.in_dimension(dimension)
            .into_iter()
            .filter(|entity| {
                entity.coordinate.horizontal_distance(&center) <= range
                    && (entity.coordinate.z - center.z).abs() <= vertical_range
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
