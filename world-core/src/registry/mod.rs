//! Content Registries
//!
//! Explicitly constructed service objects shared across the world via `Arc`:
//! - `NameRegistry`: string name ↔ stable integer id, one per scope
//! - tile and entity definitions keyed by id
//! - the transition registry built from name-keyed content
//!
//! Content is authored as JSON or RON (`RegistryConfig`) and resolved into
//! ids once at startup. Unknown names are content bugs and surface as
//! `WorldError::UnknownName`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

use crate::error::{WorldError, WorldResult};
use crate::transition::{TransitionConfig, TransitionRegistry};
use crate::viewer::TagSet;

// ============================================================================
// NameRegistry
// ============================================================================

/// Bidirectional name ↔ id table. Ids start at 1; 0 is reserved for "none".
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    scope: String,
    ids: HashMap<String, u32>,
    names: Vec<String>,
}

impl NameRegistry {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ids: HashMap::new(),
            names: Vec::new(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Register `name`, returning its id. Re-registering returns the existing id.
    pub fn register(&mut self, name: &str) -> u32 {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        self.names.push(name.to_string());
        let id = self.names.len() as u32;
        self.ids.insert(name.to_string(), id);
        id
    }

    pub fn id(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    pub fn require_id(&self, name: &str) -> WorldResult<u32> {
        self.id(name)
            .ok_or_else(|| WorldError::unknown_name(&self.scope, name))
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        let index = id.checked_sub(1)? as usize;
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ============================================================================
// Definitions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDefinition {
    pub name: String,
    /// Blocks movement for collision viewers
    #[serde(default)]
    pub solid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default)]
    pub visibility_tags: TagSet,
    #[serde(default)]
    pub collision_tags: TagSet,
    /// Initial dynamic components copied onto each spawned entity
    #[serde(default)]
    pub components: BTreeMap<String, Value>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility_tags: TagSet::default(),
            collision_tags: TagSet::default(),
            components: BTreeMap::new(),
        }
    }
}

/// Content file schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub tiles: Vec<TileDefinition>,
    #[serde(default)]
    pub entities: Vec<EntityDefinition>,
    #[serde(default)]
    pub transitions: Vec<TransitionConfig>,
}

impl RegistryConfig {
    /// Load from a `.json` or `.ron` file
    pub fn load(path: &Path) -> WorldResult<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("ron") => ron::from_str(&text).map_err(|e| WorldError::Config(e.to_string())),
            Some("json") => Ok(serde_json::from_str(&text)?),
            other => Err(WorldError::Config(format!(
                "unsupported content format: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }
}

// ============================================================================
// Registries
// ============================================================================

/// Process-wide content tables, built once and injected
#[derive(Debug, Clone)]
pub struct Registries {
    pub tiles: NameRegistry,
    pub entities: NameRegistry,
    pub tile_definitions: HashMap<u32, TileDefinition>,
    pub entity_definitions: HashMap<u32, EntityDefinition>,
    pub transitions: TransitionRegistry,
}

impl Default for Registries {
    fn default() -> Self {
        Self {
            tiles: NameRegistry::new("tile"),
            entities: NameRegistry::new("entity"),
            tile_definitions: HashMap::new(),
            entity_definitions: HashMap::new(),
            transitions: TransitionRegistry::default(),
        }
    }
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every tile and entity, then resolve transitions by name
    pub fn from_config(config: &RegistryConfig) -> WorldResult<Self> {
        let mut registries = Self::new();
        for tile in &config.tiles {
            registries.register_tile(tile.clone());
        }
        for entity in &config.entities {
            registries.register_entity(entity.clone());
        }
        registries.transitions = TransitionRegistry::from_config(&config.transitions, &registries.tiles)?;
        info!(
            tiles = registries.tiles.len(),
            entities = registries.entities.len(),
            transitions = registries.transitions.len(),
            "Registries loaded"
        );
        Ok(registries)
    }

    pub fn load(path: &Path) -> WorldResult<Self> {
        Self::from_config(&RegistryConfig::load(path)?)
    }

    pub fn register_tile(&mut self, definition: TileDefinition) -> u32 {
        let id = self.tiles.register(&definition.name);
        self.tile_definitions.insert(id, definition);
        id
    }

    pub fn register_entity(&mut self, definition: EntityDefinition) -> u32 {
        let id = self.entities.register(&definition.name);
        self.entity_definitions.insert(id, definition);
        id
    }

    pub fn tile_id(&self, name: &str) -> WorldResult<u32> {
        self.tiles.require_id(name)
    }

    pub fn entity_id(&self, name: &str) -> WorldResult<u32> {
        self.entities.require_id(name)
    }

    pub fn entity_definition(&self, id: u32) -> Option<&EntityDefinition> {
        self.entity_definitions.get(&id)
    }

    pub fn is_solid(&self, tile: u32) -> bool {
        self.tile_definitions.get(&tile).is_some_and(|def| def.solid)
    }
}
