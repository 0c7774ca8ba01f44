//! Runtime Configuration
//!
//! `ServerConfig` is loaded from a JSON or RON file (picked by extension),
//! then selectively overridden from the environment:
//! - `TILE_WORLD_HOST`
//! - `TILE_WORLD_PORT`
//! - `TILE_WORLD_API_PORT`
//! - `TILE_WORLD_TICK_RATE`
//!
//! Every field has a default, so a missing file section is never an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::constants::{DEFAULT_MOVE_DURATION_SECS, DEFAULT_SYNC_RANGE, DEFAULT_SYNC_VERTICAL_RANGE};
use crate::error::{WorldError, WorldResult};

pub const ENV_HOST: &str = "TILE_WORLD_HOST";
pub const ENV_PORT: &str = "TILE_WORLD_PORT";
pub const ENV_API_PORT: &str = "TILE_WORLD_API_PORT";
pub const ENV_TICK_RATE: &str = "TILE_WORLD_TICK_RATE";

/// Sync and movement tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Horizontal sync range, in windows around the camera window
    pub sync_range: i32,
    /// Vertical sync range, in z levels
    pub sync_vertical_range: i32,
    /// Extra tiles added to the entity watch range
    pub entity_range_padding: i32,
    /// Client interpolation time of a one-step move
    pub move_duration_secs: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            sync_range: DEFAULT_SYNC_RANGE,
            sync_vertical_range: DEFAULT_SYNC_VERTICAL_RANGE,
            entity_range_padding: 8,
            move_duration_secs: DEFAULT_MOVE_DURATION_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// Game protocol (framed TCP) port
    pub port: u16,
    /// Admin HTTP API port
    pub api_port: u16,
    /// Ticks per second of the main loop
    pub tick_rate: u32,
    /// Connections silent for longer are closed
    pub idle_timeout_secs: u64,
    /// Upper bound on bridge commands drained per tick
    pub max_commands_per_tick: usize,
    pub world: WorldConfig,
    /// Registry content file (JSON or RON); built-in defaults when absent
    pub content_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 25600,
            api_port: 25601,
            tick_rate: 20,
            idle_timeout_secs: 30,
            max_commands_per_tick: 256,
            world: WorldConfig::default(),
            content_path: None,
        }
    }
}

impl ServerConfig {
    /// Parse a `.json` or `.ron` config file
    pub fn from_file(path: &Path) -> WorldResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&text)?,
            Some("ron") => ron::from_str(&text).map_err(|e| WorldError::Config(e.to_string()))?,
            other => {
                return Err(WorldError::Config(format!(
                    "unsupported config format: {}",
                    other.unwrap_or("<none>")
                )))
            }
        };
        info!(path = %path.display(), "Loaded server config");
        Ok(config)
    }

    /// File (if given) then environment overrides
    pub fn load(path: Option<&Path>) -> WorldResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`; unparsable values are logged and ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid {ENV_PORT}"),
            }
        }
        if let Some(port) = lookup(ENV_API_PORT) {
            match port.parse() {
                Ok(port) => self.api_port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid {ENV_API_PORT}"),
            }
        }
        if let Some(rate) = lookup(ENV_TICK_RATE) {
            match rate.parse() {
                Ok(rate) => self.tick_rate = rate,
                Err(_) => warn!(value = %rate, "Ignoring invalid {ENV_TICK_RATE}"),
            }
        }
    }

    pub fn validate(&self) -> WorldResult<()> {
        if self.tick_rate == 0 {
            return Err(WorldError::Config("tick_rate must be positive".into()));
        }
        if self.world.sync_range < 0 || self.world.sync_vertical_range < 0 {
            return Err(WorldError::Config("sync ranges must not be negative".into()));
        }
        if self.max_commands_per_tick == 0 {
            return Err(WorldError::Config("max_commands_per_tick must be positive".into()));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn api_address(&self) -> String {
        format!("{}:{}", self.host, self.api_port)
    }
}
