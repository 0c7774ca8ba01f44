//! Registry content: built-in defaults or a JSON/RON content file.

use std::sync::Arc;
use tracing::info;

use world_core::config::ServerConfig;
use world_core::registry::{EntityDefinition, Registries, TileDefinition};
use world_core::transition::{TransitionDefinition, TransitionRule};
use world_core::WorldResult;

/// Entity definition spawned for every new connection
pub const PLAYER_ENTITY: &str = "player";

/// Minimal content so a bare server is playable
pub fn builtin_registries() -> Registries {
    let mut registries = Registries::new();
    for (name, solid) in [("grass", false), ("dirt", false), ("water", false), ("stone", true)] {
        registries.register_tile(TileDefinition {
            name: name.to_string(),
            solid,
        });
    }
    registries.register_entity(EntityDefinition::new(PLAYER_ENTITY));

    // grass bleeds a fringe onto cardinal neighbours
    let mut rules = Vec::new();
    for (suffix, slot) in [("n", 1), ("w", 3), ("e", 4), ("s", 6)] {
        let fringe = registries.register_tile(TileDefinition {
            name: format!("grass_fringe_{suffix}"),
            solid: false,
        });
        rules.push(TransitionRule::new(1 << slot, 0, fringe));
    }
    if let Some(grass) = registries.tiles.id("grass") {
        registries.transitions.insert(grass, TransitionDefinition::new(1, rules));
    }
    registries
}

/// Content file from the config, or the built-in set
pub fn load_registries(config: &ServerConfig) -> WorldResult<Arc<Registries>> {
    let registries = match &config.content_path {
        Some(path) => Registries::load(path)?,
        None => {
            info!("No content file configured; using built-in registries");
            builtin_registries()
        }
    };
    info!(
        tiles = registries.tiles.len(),
        entities = registries.entities.len(),
        transitions = registries.transitions.len(),
        "Registries ready"
    );
    Ok(Arc::new(registries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_content() {
        let registries = builtin_registries();
        assert!(registries.is_solid(registries.tile_id("stone").unwrap()));
        assert!(!registries.is_solid(registries.tile_id("grass").unwrap()));
        assert!(registries.entity_id(PLAYER_ENTITY).is_ok());
        assert_eq!(registries.transitions.len(), 1);
    }

    #[test]
    fn test_load_from_content_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"tiles": [{{"name": "sand"}}], "entities": [{{"name": "player"}}]}}"#
        )
        .unwrap();
        let config = ServerConfig {
            content_path: Some(file.path().to_path_buf()),
            ..ServerConfig::default()
        };
        let registries = load_registries(&config).unwrap();
        assert_eq!(registries.tile_id("sand").unwrap(), 1);
        assert!(registries.tile_id("grass").is_err());
    }
}
