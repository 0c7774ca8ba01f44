//! Error types for the world core.
//!
//! Expected no-ops (occupied dense cell, mismatched removal) are reported as
//! `false` by the mutation API and never show up here. Structural invariant
//! violations panic. What remains are lookup failures that indicate a
//! content/data bug and must reach the scripting boundary as catchable errors.

use crate::entity::NetworkId;
use crate::sync::ConnectionId;
use crate::world::DimensionId;

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("Unknown {scope} name: {name}")]
    UnknownName { scope: String, name: String },

    #[error("Unknown dimension: {0}")]
    UnknownDimension(DimensionId),

    #[error("Unknown dimension name: {0}")]
    UnknownDimensionName(String),

    #[error("Dimension already exists: {0}")]
    DuplicateDimension(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(NetworkId),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Layer already exists: {0}")]
    DuplicateLayer(String),

    #[error("Invalid map fragment: {0}")]
    InvalidMap(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorldError {
    pub fn unknown_name(scope: &str, name: &str) -> Self {
        WorldError::UnknownName {
            scope: scope.to_string(),
            name: name.to_string(),
        }
    }
}

/// Wire envelope decode/encode failures. Terminal for the affected
/// connection only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("Truncated packet: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("Unknown packet type: {0}")]
    UnknownPacket(u8),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Invalid string: {0}")]
    InvalidString(String),

    #[error("Invalid length: {0}")]
    InvalidLength(String),

    #[error("Trailing bytes after packet {packet}: {remaining}")]
    TrailingBytes { packet: u8, remaining: usize },
}

pub type WorldResult<T> = Result<T, WorldError>;
