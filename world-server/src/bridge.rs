//! Tick Bridge: connects transport tasks and API handlers to the world tick
//!
//! Transport and admin API run on a tokio runtime, while Bevy runs the tick.
//! Everything that touches `WorldState` crosses this bridge:
//!
//! ```text
//! TCP reader / Axum handler (tokio async)
//!       │
//!       ▼
//! ServerCommand → mpsc channel → Bevy System (process_server_commands)
//!       │                           │
//!       │                           ▼
//!       │                     Mutate WorldState
//!       │                           │
//!       ▼                           ▼
//! oneshot::Receiver ◄── oneshot::Sender (reply, scripting calls only)
//! ```
//!
//! After the drain, `flush_world_changes` re-pushes stale windows and
//! `update_world_snapshot` publishes read-only stats for the API.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use world_core::coords::Coordinate;
use world_core::entity::NetworkId;
use world_core::sync::{ConnectionId, PacketSink};
use world_core::viewer::ViewerPair;
use world_core::wire::Packet;
use world_core::{DimensionId, WorldResult, WorldState};

use crate::metrics::ServerMetrics;

// ============================================================================
// World Snapshot (read-only, updated every tick)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub players: usize,
    pub entities: usize,
    pub dimensions: Vec<DimensionSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionSnapshot {
    pub id: u32,
    pub name: String,
    pub watchers: usize,
    pub layers: Vec<String>,
}

/// Shared handle to the world snapshot (Arc<RwLock<>> for API access)
pub type SharedWorldSnapshot = Arc<RwLock<WorldSnapshot>>;

// ============================================================================
// Server Commands (transport / API → tick)
// ============================================================================

#[derive(Debug)]
pub enum ServerCommand {
    /// A client connected; `outbound` feeds its writer task
    ConnectionOpened {
        connection: ConnectionId,
        outbound: mpsc::UnboundedSender<Packet>,
    },
    /// Reader ended (EOF, idle timeout, decode error)
    ConnectionClosed { connection: ConnectionId },
    /// One decoded client packet
    Inbound {
        connection: ConnectionId,
        packet: Packet,
    },
    PlaceTile {
        dimension: String,
        coordinate: Coordinate,
        tile: String,
        layer: String,
        reply: oneshot::Sender<CommandResult>,
    },
    RemoveTile {
        dimension: String,
        coordinate: Coordinate,
        tile: String,
        layer: String,
        reply: oneshot::Sender<CommandResult>,
    },
    SetLayerVisibility {
        dimension: String,
        layer: String,
        tag: String,
        enabled: bool,
        reply: oneshot::Sender<CommandResult>,
    },
    SpawnEntity {
        dimension: String,
        name: String,
        coordinate: Coordinate,
        reply: oneshot::Sender<SpawnResult>,
    },
    TeleportEntity {
        network_id: u32,
        coordinate: Coordinate,
        reply: oneshot::Sender<CommandResult>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
}

impl CommandResult {
    fn from_outcome(outcome: WorldResult<bool>, done: &str, noop: &str) -> Self {
        match outcome {
            Ok(true) => Self {
                success: true,
                message: done.into(),
            },
            Ok(false) => Self {
                success: false,
                message: noop.into(),
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnResult {
    pub success: bool,
    pub network_id: Option<u32>,
    pub message: String,
}

/// Channel sender type for transport tasks and API handlers
pub type CommandSender = mpsc::UnboundedSender<ServerCommand>;
/// Channel receiver type for the tick
pub type CommandReceiver = mpsc::UnboundedReceiver<ServerCommand>;

// ============================================================================
// Connection sink
// ============================================================================

/// Outbound path of one connection: hands packets to its writer task.
/// Never blocks; packets for a closed writer are counted and dropped.
#[derive(Debug, Clone)]
pub struct ConnectionSink {
    outbound: mpsc::UnboundedSender<Packet>,
    metrics: Arc<ServerMetrics>,
}

impl ConnectionSink {
    pub fn new(outbound: mpsc::UnboundedSender<Packet>, metrics: Arc<ServerMetrics>) -> Self {
        Self { outbound, metrics }
    }
}

impl PacketSink for ConnectionSink {
    fn send(&mut self, packet: Packet) {
        if self.outbound.send(packet).is_err() {
            self.metrics.record_dropped();
        }
    }
}

// ============================================================================
// Bevy Resources
// ============================================================================

/// Resource holding the command receiver (consumed by the tick)
#[derive(Resource)]
pub struct ServerCommandReceiver {
    pub receiver: CommandReceiver,
}

/// The authoritative world
#[derive(Resource)]
pub struct TileWorld {
    pub state: WorldState,
}

#[derive(Resource)]
pub struct WorldSnapshotResource {
    pub snapshot: SharedWorldSnapshot,
}

#[derive(Resource)]
pub struct MetricsResource {
    pub metrics: Arc<ServerMetrics>,
}

/// Where and as what new connections enter the world
#[derive(Resource, Debug, Clone)]
pub struct BridgeSettings {
    pub max_commands_per_tick: usize,
    pub spawn_dimension: DimensionId,
    pub spawn_point: Coordinate,
    /// Entity spawned and followed per connection; `None` for a free camera
    pub player_entity: Option<String>,
}

/// Entity controlled by each connection
#[derive(Resource, Debug, Default)]
pub struct ConnectionEntities {
    pub entities: HashMap<ConnectionId, NetworkId>,
}

/// Commands executed during the current tick
#[derive(Resource, Debug, Default)]
pub struct TickCounters {
    pub commands: usize,
}

// ============================================================================
// Command execution
// ============================================================================

fn resolve_dimension(state: &WorldState, name: &str) -> WorldResult<DimensionId> {
    state.dimension_id(name)
}

/// Apply one command to the world. Failures are logged or replied, never
/// propagated: one bad command must not stall the tick.
pub fn execute_command(
    state: &mut WorldState,
    connections: &mut ConnectionEntities,
    settings: &BridgeSettings,
    metrics: &Arc<ServerMetrics>,
    command: ServerCommand,
) {
    match command {
        ServerCommand::ConnectionOpened {
            connection,
            outbound,
        } => {
            let sink = ConnectionSink::new(outbound, metrics.clone());
            if let Err(e) = state.connect_player(
                connection,
                Box::new(sink),
                ViewerPair::default(),
                settings.spawn_dimension,
                settings.spawn_point,
            ) {
                warn!(%connection, error = %e, "Failed to attach connection");
                return;
            }
            if let Some(name) = &settings.player_entity {
                let spawned = state
                    .spawn_entity(settings.spawn_dimension, name, settings.spawn_point)
                    .and_then(|id| state.follow_entity(connection, id).map(|_| id));
                match spawned {
                    Ok(id) => {
                        connections.entities.insert(connection, id);
                    }
                    Err(e) => warn!(%connection, error = %e, "Failed to spawn player entity"),
                }
            }
        }

        ServerCommand::ConnectionClosed { connection } => {
            if let Some(id) = connections.entities.remove(&connection) {
                if let Err(e) = state.despawn_entity(id) {
                    debug!(%connection, error = %e, "Player entity already gone");
                }
            }
            state.disconnect_player(connection);
        }

        ServerCommand::Inbound { connection, packet } => {
            let name = packet.name();
            if let Err(e) = state.handle_packet(connection, packet) {
                warn!(%connection, packet = name, error = %e, "Dropped inbound packet");
            }
        }

        ServerCommand::PlaceTile {
            dimension,
            coordinate,
            tile,
            layer,
            reply,
        } => {
            let outcome = resolve_dimension(state, &dimension)
                .and_then(|dim| state.place_tile(dim, coordinate, &tile, &layer));
            let _ = reply.send(CommandResult::from_outcome(outcome, "Placed", "Not placed"));
        }

        ServerCommand::RemoveTile {
            dimension,
            coordinate,
            tile,
            layer,
            reply,
        } => {
            let outcome = resolve_dimension(state, &dimension)
                .and_then(|dim| state.remove_tile(dim, coordinate, &tile, &layer));
            let _ = reply.send(CommandResult::from_outcome(outcome, "Removed", "Tile not present"));
        }

        ServerCommand::SetLayerVisibility {
            dimension,
            layer,
            tag,
            enabled,
            reply,
        } => {
            let outcome = resolve_dimension(state, &dimension)
                .and_then(|dim| state.set_layer_visibility_tag(dim, &layer, &tag, enabled));
            let _ = reply.send(CommandResult::from_outcome(outcome, "Updated", "Unchanged"));
        }

        ServerCommand::SpawnEntity {
            dimension,
            name,
            coordinate,
            reply,
        } => {
            let result = match resolve_dimension(state, &dimension)
                .and_then(|dim| state.spawn_entity(dim, &name, coordinate))
            {
                Ok(id) => SpawnResult {
                    success: true,
                    network_id: Some(id.0),
                    message: "Spawned".into(),
                },
                Err(e) => SpawnResult {
                    success: false,
                    network_id: None,
                    message: e.to_string(),
                },
            };
            let _ = reply.send(result);
        }

        ServerCommand::TeleportEntity {
            network_id,
            coordinate,
            reply,
        } => {
            let outcome = state
                .teleport_entity(NetworkId(network_id), coordinate)
                .map(|_| true);
            let _ = reply.send(CommandResult::from_outcome(outcome, "Teleported", "Unchanged"));
        }
    }
}

// ============================================================================
// Bevy Systems
// ============================================================================

/// System: drain at most `max_commands_per_tick` bridge commands
pub fn process_server_commands(
    mut receiver: ResMut<ServerCommandReceiver>,
    mut world: ResMut<TileWorld>,
    mut connections: ResMut<ConnectionEntities>,
    mut counters: ResMut<TickCounters>,
    settings: Res<BridgeSettings>,
    metrics: Res<MetricsResource>,
) {
    let mut processed = 0;
    while processed < settings.max_commands_per_tick {
        let Ok(command) = receiver.receiver.try_recv() else {
            break;
        };
        processed += 1;
        execute_command(&mut world.state, &mut connections, &settings, &metrics.metrics, command);
    }
    counters.commands = processed;
}

/// System: tick-end re-push of windows made stale this tick
pub fn flush_world_changes(mut world: ResMut<TileWorld>, counters: Res<TickCounters>, metrics: Res<MetricsResource>) {
    let windows = world.state.flush_changes();
    metrics.metrics.record_tick(counters.commands, windows);
}

/// System: publish read-only stats for the admin API
pub fn update_world_snapshot(
    world: Res<TileWorld>,
    snapshot_res: Res<WorldSnapshotResource>,
    metrics: Res<MetricsResource>,
) {
    let state = &world.state;
    let snap = WorldSnapshot {
        tick: metrics.metrics.snapshot().ticks,
        players: state.player_count(),
        entities: state.entities().len(),
        dimensions: state
            .dimensions()
            .map(|dimension| DimensionSnapshot {
                id: dimension.id().0,
                name: dimension.name().to_string(),
                watchers: dimension.sync().watcher_count(),
                layers: dimension
                    .tree()
                    .layers()
                    .iter()
                    .map(|layer| layer.name().to_string())
                    .collect(),
            })
            .collect(),
    };

    if let Ok(mut lock) = snapshot_res.snapshot.write() {
        *lock = snap;
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Create the bridge channels and shared snapshot.
/// Returns (CommandSender for producers, ServerCommandReceiver for the tick, SharedWorldSnapshot)
pub fn create_bridge() -> (CommandSender, ServerCommandReceiver, SharedWorldSnapshot) {
    let (tx, rx) = mpsc::unbounded_channel();
    let snapshot = Arc::new(RwLock::new(WorldSnapshot::default()));

    (tx, ServerCommandReceiver { receiver: rx }, snapshot)
}

/// Insert the world resources and the ordered tick systems
pub fn install(
    app: &mut App,
    state: WorldState,
    receiver: ServerCommandReceiver,
    snapshot: SharedWorldSnapshot,
    settings: BridgeSettings,
    metrics: Arc<ServerMetrics>,
) {
    app.insert_resource(TileWorld { state })
        .insert_resource(receiver)
        .insert_resource(WorldSnapshotResource { snapshot })
        .insert_resource(settings)
        .insert_resource(MetricsResource { metrics })
        .init_resource::<ConnectionEntities>()
        .init_resource::<TickCounters>()
        .add_systems(
            Update,
            (process_server_commands, flush_world_changes, update_world_snapshot).chain(),
        );
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{builtin_registries, PLAYER_ENTITY};
    use world_core::config::WorldConfig;
    use world_core::tree::MapTree;
    use world_core::wire::{MoveRequestPacket, Packet};

    fn test_app(player_entity: Option<&str>, max_commands: usize) -> (App, CommandSender, SharedWorldSnapshot) {
        let config = WorldConfig {
            sync_range: 1,
            sync_vertical_range: 0,
            ..WorldConfig::default()
        };
        let mut state = WorldState::new(Arc::new(builtin_registries()), config);
        let overworld = state.create_dimension("overworld", MapTree::new()).unwrap();
        let (tx, rx, snapshot) = create_bridge();
        let settings = BridgeSettings {
            max_commands_per_tick: max_commands,
            spawn_dimension: overworld,
            spawn_point: Coordinate::new(0, 0, 0),
            player_entity: player_entity.map(str::to_string),
        };
        let mut app = App::new();
        install(&mut app, state, rx, snapshot.clone(), settings, ServerMetrics::new());
        (app, tx, snapshot)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Packet>) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok(packet) = rx.try_recv() {
            packets.push(packet);
        }
        packets
    }

    #[test]
    fn test_create_bridge() {
        let (tx, _rx, snapshot) = create_bridge();
        assert!(!tx.is_closed());
        let snap = snapshot.read().unwrap();
        assert_eq!(snap.tick, 0);
        assert!(snap.dimensions.is_empty());
    }

    #[test]
    fn test_connection_gets_initial_sync_and_player_entity() {
        let (mut app, tx, snapshot) = test_app(Some(PLAYER_ENTITY), 64);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        tx.send(ServerCommand::ConnectionOpened {
            connection: ConnectionId(1),
            outbound: out_tx,
        })
        .unwrap();
        app.update();

        let packets = drain(&mut out_rx);
        assert_eq!(packets.iter().filter(|p| matches!(p, Packet::MapChunk(_))).count(), 9);
        assert_eq!(packets.iter().filter(|p| matches!(p, Packet::Entity(_))).count(), 1);
        assert_eq!(app.world().resource::<ConnectionEntities>().entities.len(), 1);

        let snap = snapshot.read().unwrap().clone();
        assert_eq!(snap.players, 1);
        assert_eq!(snap.entities, 1);
        assert_eq!(snap.dimensions[0].watchers, 1);
    }

    #[test]
    fn test_inbound_move_and_close() {
        let (mut app, tx, _snapshot) = test_app(Some(PLAYER_ENTITY), 64);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        tx.send(ServerCommand::ConnectionOpened {
            connection: ConnectionId(1),
            outbound: out_tx,
        })
        .unwrap();
        app.update();
        drain(&mut out_rx);

        tx.send(ServerCommand::Inbound {
            connection: ConnectionId(1),
            packet: Packet::MoveRequest(MoveRequestPacket {
                target: Coordinate::new(1, 0, 0),
                facing: 0.0,
            }),
        })
        .unwrap();
        app.update();
        assert!(matches!(drain(&mut out_rx).last(), Some(Packet::MoveEntity(packet)) if packet.end == Coordinate::new(1, 0, 0)));

        tx.send(ServerCommand::ConnectionClosed {
            connection: ConnectionId(1),
        })
        .unwrap();
        app.update();
        let world = &app.world().resource::<TileWorld>().state;
        assert_eq!(world.player_count(), 0);
        assert!(world.entities().is_empty());
    }

    #[test]
    fn test_place_tile_replies_and_repushes_at_tick_end() {
        let (mut app, tx, _snapshot) = test_app(None, 64);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        tx.send(ServerCommand::ConnectionOpened {
            connection: ConnectionId(1),
            outbound: out_tx,
        })
        .unwrap();
        app.update();
        drain(&mut out_rx);

        let (reply_tx, mut reply_rx) = oneshot::channel();
        tx.send(ServerCommand::PlaceTile {
            dimension: "overworld".into(),
            coordinate: Coordinate::new(3, 3, 0),
            tile: "stone".into(),
            layer: "default".into(),
            reply: reply_tx,
        })
        .unwrap();
        app.update();

        assert!(reply_rx.try_recv().unwrap().success);
        let packets = drain(&mut out_rx);
        assert_eq!(packets.len(), 1);
        assert!(matches!(&packets[0], Packet::MapChunk(_)));
    }

    #[test]
    fn test_unknown_names_reply_with_error() {
        let (mut app, tx, _snapshot) = test_app(None, 64);
        let (reply_tx, mut reply_rx) = oneshot::channel();
        tx.send(ServerCommand::PlaceTile {
            dimension: "overworld".into(),
            coordinate: Coordinate::new(0, 0, 0),
            tile: "lava".into(),
            layer: "default".into(),
            reply: reply_tx,
        })
        .unwrap();
        let (spawn_tx, mut spawn_rx) = oneshot::channel();
        tx.send(ServerCommand::SpawnEntity {
            dimension: "nether".into(),
            name: PLAYER_ENTITY.into(),
            coordinate: Coordinate::new(0, 0, 0),
            reply: spawn_tx,
        })
        .unwrap();
        app.update();

        let result = reply_rx.try_recv().unwrap();
        assert!(!result.success);
        assert_eq!(result.message, "Unknown tile name: lava");
        assert!(!spawn_rx.try_recv().unwrap().success);
    }

    #[test]
    fn test_command_budget_per_tick() {
        let (mut app, tx, _snapshot) = test_app(None, 2);
        let mut replies = Vec::new();
        for x in 0..5 {
            let (reply_tx, reply_rx) = oneshot::channel();
            tx.send(ServerCommand::PlaceTile {
                dimension: "overworld".into(),
                coordinate: Coordinate::new(x, 0, 0),
                tile: "grass".into(),
                layer: "default".into(),
                reply: reply_tx,
            })
            .unwrap();
            replies.push(reply_rx);
        }
        app.update();
        assert_eq!(app.world().resource::<TickCounters>().commands, 2);
        app.update();
        app.update();
        assert_eq!(app.world().resource::<TickCounters>().commands, 1);
        assert!(replies.iter_mut().all(|reply| reply.try_recv().unwrap().success));
    }

    #[test]
    fn test_dropped_packets_counted_after_writer_closes() {
        let metrics = ServerMetrics::new();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let mut sink = ConnectionSink::new(out_tx, metrics.clone());
        drop(out_rx);
        sink.send(Packet::KeepAlive(world_core::wire::KeepAlivePacket));
        assert_eq!(metrics.snapshot().dropped_packets, 1);
    }
}
