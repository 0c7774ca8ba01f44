//! Structured Logging & Tracing
//!
//! Provides structured logging via the `tracing` crate with:
//! - Level-based filtering (TRACE/DEBUG/INFO/WARN/ERROR)
//! - Per-module filter overrides (`world_core::sync=debug`)
//! - `RUST_LOG` taking precedence over the configured filter
//! - Idempotent initialization (first call wins)

use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Log level for the world core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration for tracing initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub default_level: LogLevel,
    pub module_filters: Vec<(String, LogLevel)>,
    pub show_targets: bool,
    pub show_thread_ids: bool,
    pub show_file_line: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: LogLevel::Info,
            module_filters: vec![
                ("world_core::tree".to_string(), LogLevel::Info),
                ("world_core::sync".to_string(), LogLevel::Info),
                ("world_core::view".to_string(), LogLevel::Warn),
                ("tile_world_server::net".to_string(), LogLevel::Info),
            ],
            show_targets: true,
            show_thread_ids: false,
            show_file_line: false,
        }
    }
}

impl TracingConfig {
    pub fn to_env_filter_string(&self) -> String {
        let mut parts = vec![self.default_level.as_str().to_string()];
        for (module, level) in &self.module_filters {
            parts.push(format!("{}={}", module, level.as_str()));
        }
        parts.join(",")
    }
}

static TRACING_INIT: Once = Once::new();

/// Initialize tracing with default settings (idempotent)
pub fn init_tracing_default() {
    init_tracing(&TracingConfig::default());
}

/// Initialize tracing with custom config (idempotent, first call wins)
pub fn init_tracing(config: &TracingConfig) {
    let filter_str = config.to_env_filter_string();
    let config = config.clone();
    TRACING_INIT.call_once(move || {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.show_targets)
            .with_thread_ids(config.show_thread_ids)
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .compact();

        // A global subscriber may already be installed (tests, embedding app)
        let _ = subscriber.try_init();
    });
}
