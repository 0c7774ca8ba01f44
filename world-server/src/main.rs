use anyhow::Context;
use bevy::app::ScheduleRunnerPlugin;
use bevy::prelude::*;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use tile_world_server::{
    api::{self, ApiState},
    bridge::{self, BridgeSettings},
    content::{self, PLAYER_ENTITY},
    metrics::ServerMetrics,
    net::{self, NetConfig},
};
use world_core::config::ServerConfig;
use world_core::coords::Coordinate;
use world_core::logging::init_tracing_default;
use world_core::tree::MapTree;
use world_core::WorldState;

const ENV_CONFIG: &str = "TILE_WORLD_CONFIG";
const SPAWN_DIMENSION: &str = "overworld";

fn main() -> anyhow::Result<()> {
    init_tracing_default();

    // ========================================================================
    // 1. Configuration and content
    // ========================================================================
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(ENV_CONFIG).ok())
        .map(PathBuf::from);
    let config = ServerConfig::load(config_path.as_deref()).context("Failed to load server config")?;
    let registries = content::load_registries(&config).context("Failed to load registry content")?;

    // ========================================================================
    // 2. World
    // ========================================================================
    let mut state = WorldState::new(registries, config.world.clone());
    let spawn_dimension = state
        .create_dimension(SPAWN_DIMENSION, MapTree::new())
        .context("Failed to create spawn dimension")?;

    // ========================================================================
    // 3. Bridge, then transport + admin API on a separate tokio runtime
    // ========================================================================
    let (cmd_sender, cmd_receiver, world_snapshot) = bridge::create_bridge();
    let metrics = ServerMetrics::new();

    let game_addr = config.bind_address();
    let api_addr = config.api_address();
    let net_config = NetConfig {
        idle_timeout: Duration::from_secs(config.idle_timeout_secs),
    };
    let api_state = ApiState {
        commands: cmd_sender.clone(),
        world_snapshot: world_snapshot.clone(),
        metrics: metrics.clone(),
    };
    let net_metrics = metrics.clone();
    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    std::thread::spawn(move || {
        runtime.block_on(async move {
            let game_listener = match tokio::net::TcpListener::bind(&game_addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(addr = %game_addr, error = %e, "Cannot bind game port");
                    std::process::exit(1);
                }
            };
            let api_listener = match tokio::net::TcpListener::bind(&api_addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(addr = %api_addr, error = %e, "Cannot bind admin API port");
                    std::process::exit(1);
                }
            };

            tokio::select! {
                result = net::serve(game_listener, cmd_sender, net_metrics, net_config) => {
                    if let Err(e) = result {
                        error!(error = %e, "Game transport stopped");
                    }
                }
                result = api::start_api_server(api_listener, api_state) => {
                    if let Err(e) = result {
                        error!(error = %e, "Admin API stopped");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                }
            }
            std::process::exit(0);
        });
    });

    // ========================================================================
    // 4. Fixed-rate tick
    // ========================================================================
    let settings = BridgeSettings {
        max_commands_per_tick: config.max_commands_per_tick,
        spawn_dimension,
        spawn_point: Coordinate::new(0, 0, 0),
        player_entity: Some(PLAYER_ENTITY.to_string()),
    };
    let tick = Duration::from_secs_f64(1.0 / f64::from(config.tick_rate));
    info!(tick_rate = config.tick_rate, game = %config.bind_address(), api = %config.api_address(), "Starting tile world server");

    let mut app = App::new();
    app.add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(tick)));
    bridge::install(&mut app, state, cmd_receiver, world_snapshot, settings, metrics);
    app.run();
    Ok(())
}
