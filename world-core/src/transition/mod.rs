//! Edge Transitions (autotiling)
//!
//! Post-processes a materialized `ScopedView`: at every boundary between two
//! structurally different tiles, the higher-priority neighbour contributes a
//! decoration tile chosen by its 8-neighbour bitmask.
//!
//! Neighbour slot order (bit i):
//! ```text
//!  0 1 2      NW N  NE
//!  3 . 4  =>  W  .  E
//!  5 6 7      SW S  SE
//! ```
//!
//! Equal-priority candidates are ordered by neighbour frequency (more wins),
//! then by lowest neighbour tile id.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;

use crate::constants::EMPTY_TILE;
use crate::error::WorldResult;
use crate::layer::TileId;
use crate::registry::NameRegistry;
use crate::view::ScopedView;

/// Relative offsets of the 8 neighbour slots, in bit order
pub const NEIGHBOR_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Mask with every neighbour slot set
pub const FULL_MASK: u8 = 0xFF;

// ============================================================================
// Definitions
// ============================================================================

/// One mask → tile rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    /// Slots that must hold the neighbour tile
    pub mask: u8,
    /// Slots that must not hold the neighbour tile
    #[serde(default)]
    pub exclude: u8,
    pub tile: TileId,
}

impl TransitionRule {
    pub fn new(mask: u8, exclude: u8, tile: TileId) -> Self {
        Self { mask, exclude, tile }
    }

    pub fn matches(&self, neighbors: u8) -> bool {
        neighbors & self.mask == self.mask && neighbors & self.exclude == 0
    }
}

/// Transition behaviour of one tile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    pub priority: u32,
    pub rules: Vec<TransitionRule>,
}

impl TransitionDefinition {
    pub fn new(priority: u32, rules: Vec<TransitionRule>) -> Self {
        Self { priority, rules }
    }

    /// First rule matching `neighbors`, in declaration order
    pub fn resolve(&self, neighbors: u8) -> Option<TileId> {
        self.rules
            .iter()
            .find(|rule| rule.matches(neighbors))
            .map(|rule| rule.tile)
    }
}

/// Name-keyed rule as authored in content files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRuleConfig {
    pub mask: u8,
    #[serde(default)]
    pub exclude: u8,
    pub tile: String,
}

/// Name-keyed definition as authored in content files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionConfig {
    pub tile: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub rules: Vec<TransitionRuleConfig>,
}

/// Tile id → transition definition
#[derive(Debug, Clone, Default)]
pub struct TransitionRegistry {
    definitions: HashMap<TileId, TransitionDefinition>,
}

impl TransitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every tile name through `tiles`
    pub fn from_config(configs: &[TransitionConfig], tiles: &NameRegistry) -> WorldResult<Self> {
        let mut registry = Self::new();
        for config in configs {
            let owner = tiles.require_id(&config.tile)?;
            let rules = config
                .rules
                .iter()
                .map(|rule| Ok(TransitionRule::new(rule.mask, rule.exclude, tiles.require_id(&rule.tile)?)))
                .collect::<WorldResult<Vec<_>>>()?;
            registry.insert(owner, TransitionDefinition::new(config.priority, rules));
        }
        Ok(registry)
    }

    pub fn insert(&mut self, tile: TileId, definition: TransitionDefinition) {
        self.definitions.insert(tile, definition);
    }

    pub fn get(&self, tile: TileId) -> Option<&TransitionDefinition> {
        self.definitions.get(&tile)
    }

    /// Priority of `tile`'s own definition, 0 if it has none
    pub fn priority(&self, tile: TileId) -> u32 {
        self.get(tile).map_or(0, |definition| definition.priority)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Candidate transition for one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    priority: u32,
    frequency: u32,
    neighbor: TileId,
    tile: TileId,
}

impl Candidate {
    fn rank(&self) -> (u32, u32, Reverse<TileId>) {
        (self.priority, self.frequency, Reverse(self.neighbor))
    }
}

/// Stateless pass adding transition tiles to a view
pub struct TransitionResolver<'a> {
    registry: &'a TransitionRegistry,
}

impl<'a> TransitionResolver<'a> {
    pub fn new(registry: &'a TransitionRegistry) -> Self {
        Self { registry }
    }

    /// Base tile ids of the 8 neighbours of window-relative `(x, y)`
    fn neighbors(view: &ScopedView, x: i32, y: i32) -> [TileId; 8] {
        NEIGHBOR_OFFSETS.map(|(dx, dy)| view.base_tile_at_relative(x + dx, y + dy))
    }

    /// Winning transition tile for window-relative `(x, y)`, if any
    pub fn resolve_cell(&self, view: &ScopedView, x: i32, y: i32) -> Option<TileId> {
        let center = view.base_tile_at_relative(x, y);
        let center_priority = self.registry.priority(center);
        let neighbors = Self::neighbors(view, x, y);

        let mut frequency: Vec<(TileId, u32, u8)> = Vec::with_capacity(8);
        for (slot, id) in neighbors.iter().enumerate() {
            if *id == EMPTY_TILE {
                continue;
            }
            match frequency.iter_mut().find(|(tile, _, _)| tile == id) {
                Some((_, count, mask)) => {
                    *count += 1;
                    *mask |= 1 << slot;
                }
                None => frequency.push((*id, 1, 1 << slot)),
            }
        }

        frequency
            .into_iter()
            .filter_map(|(neighbor, count, mask)| {
                let definition = self.registry.get(neighbor)?;
                if definition.priority <= center_priority {
                    return None;
                }
                let tile = definition.resolve(mask)?;
                Some(Candidate {
                    priority: definition.priority,
                    frequency: count,
                    neighbor,
                    tile,
                })
            })
            .max_by_key(Candidate::rank)
            .map(|candidate| candidate.tile)
    }

    /// Prepend the winning transition of every interior cell
    pub fn apply(&self, view: &mut ScopedView) {
        if self.registry.is_empty() {
            return;
        }
        let window = view.window();
        let mut resolved = Vec::new();
        for y in 0..window.height {
            for x in 0..window.width {
                if let Some(tile) = self.resolve_cell(view, x, y) {
                    resolved.push((window.origin().offset(x, y, 0), tile));
                }
            }
        }
        for (coordinate, tile) in resolved {
            view.prepend_additional(coordinate, tile);
        }
    }
}
