//! Viewer Capability (tag-set visibility)
//!
//! A viewer decides whether a layer or entity is visible (or collidable) to an
//! observer: the target's tag set must intersect the viewer's tag set.
//! Tags are flat strings; there are no wildcards or hierarchies.
//!
//! ## Example
//! ```rust
//! use world_core::viewer::{TagSet, Viewer};
//!
//! let viewer = Viewer::sight(TagSet::from_tags(["default", "ghost"]));
//! assert!(viewer.tags().intersects(&TagSet::from_tags(["ghost"])));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::constants::DEFAULT_TAG;

/// Ordered set of flat string tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    tags: BTreeSet<String>,
}

impl Default for TagSet {
    /// Contains only `"default"`
    fn default() -> Self {
        Self::from_tags([DEFAULT_TAG])
    }
}

impl TagSet {
    /// Set with no tags; intersects nothing
    pub fn empty() -> Self {
        Self {
            tags: BTreeSet::new(),
        }
    }

    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if the tag was not already present
    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        self.tags.insert(tag.into())
    }

    /// Returns true if the tag was present
    pub fn remove(&mut self, tag: &str) -> bool {
        self.tags.remove(tag)
    }

    /// Insert or remove `tag`; returns true if membership changed
    pub fn set(&mut self, tag: &str, enabled: bool) -> bool {
        if enabled {
            self.insert(tag)
        } else {
            self.remove(tag)
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Non-empty intersection
    pub fn intersects(&self, other: &TagSet) -> bool {
        // Iterate the smaller set
        let (small, large) = if self.tags.len() <= other.tags.len() {
            (&self.tags, &other.tags)
        } else {
            (&other.tags, &self.tags)
        };
        small.iter().any(|tag| large.contains(tag))
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }
}

/// Anything that carries visibility and collision tags (layers, entities)
pub trait Tagged {
    fn visibility_tags(&self) -> &TagSet;
    fn collision_tags(&self) -> &TagSet;
}

/// Which tag set of a target a viewer is compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewerKind {
    /// Rendering / network sync visibility
    Sight,
    /// Movement blocking
    Collision,
}

/// Tag-intersection predicate holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    kind: ViewerKind,
    tags: TagSet,
}

impl Viewer {
    pub fn new(kind: ViewerKind, tags: TagSet) -> Self {
        Self { kind, tags }
    }

    pub fn sight(tags: TagSet) -> Self {
        Self::new(ViewerKind::Sight, tags)
    }

    pub fn collision(tags: TagSet) -> Self {
        Self::new(ViewerKind::Collision, tags)
    }

    pub fn kind(&self) -> ViewerKind {
        self.kind
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut TagSet {
        &mut self.tags
    }

    /// Core predicate: the target's relevant tag set intersects ours
    pub fn can_view<T: Tagged + ?Sized>(&self, target: &T) -> bool {
        let target_tags = match self.kind {
            ViewerKind::Sight => target.visibility_tags(),
            ViewerKind::Collision => target.collision_tags(),
        };
        self.tags.intersects(target_tags)
    }

    pub fn can_view_layer(&self, layer: &crate::layer::MapLayer) -> bool {
        self.can_view(layer)
    }

    pub fn can_view_entity(&self, entity: &crate::entity::Entity) -> bool {
        self.can_view(entity)
    }
}

/// The two independent viewers a player or entity owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerPair {
    pub sight: Viewer,
    pub collision: Viewer,
}

impl Default for ViewerPair {
    fn default() -> Self {
        Self {
            sight: Viewer::sight(TagSet::default()),
            collision: Viewer::collision(TagSet::default()),
        }
    }
}
