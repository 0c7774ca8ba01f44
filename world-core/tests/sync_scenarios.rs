//! End-to-end sync scenarios through the public `WorldState` API.
//!
//! Each client is a `RecordingSink`; assertions are made on the packets a
//! real client would have received.

use std::collections::BTreeSet;
use std::sync::Arc;

use world_core::config::WorldConfig;
use world_core::constants::{DEFAULT_LAYER, SYNC_CHUNK_SIZE};
use world_core::coords::{ChunkWindow, Coordinate};
use world_core::registry::{EntityDefinition, Registries, TileDefinition};
use world_core::sync::{ConnectionId, RecordingSink};
use world_core::tree::MapTree;
use world_core::viewer::ViewerPair;
use world_core::error::WorldError;
use world_core::wire::{encode_frame, Packet};
use world_core::{DimensionId, WorldState};

// ============================================================
// Helpers
// ============================================================

fn registries() -> Arc<Registries> {
    let mut registries = Registries::new();
    for (name, solid) in [("grass", false), ("stone", true), ("flower", false)] {
        registries.register_tile(TileDefinition {
            name: name.into(),
            solid,
        });
    }
    registries.register_entity(EntityDefinition::new("player"));
    Arc::new(registries)
}

fn world() -> (WorldState, DimensionId) {
    let config = WorldConfig {
        sync_range: 1,
        sync_vertical_range: 0,
        ..WorldConfig::default()
    };
    let mut world = WorldState::new(registries(), config);
    let overworld = world.create_dimension("overworld", MapTree::new()).unwrap();
    (world, overworld)
}

fn connect(world: &mut WorldState, n: u64, dimension: DimensionId, center: Coordinate) -> RecordingSink {
    let sink = RecordingSink::new();
    world
        .connect_player(ConnectionId(n), Box::new(sink.clone()), ViewerPair::default(), dimension, center)
        .unwrap();
    sink
}

fn count<F: Fn(&Packet) -> bool>(packets: &[Packet], predicate: F) -> usize {
    packets.iter().filter(|p| predicate(p)).count()
}

fn chunk_windows(packets: &[Packet]) -> BTreeSet<ChunkWindow> {
    packets
        .iter()
        .filter_map(|p| match p {
            Packet::MapChunk(chunk) => Some(chunk.window),
            _ => None,
        })
        .collect()
}

// ============================================================
// Chunks
// ============================================================

#[test]
fn test_initial_sync_covers_range_around_camera() {
    let (mut world, overworld) = world();
    let center = Coordinate::new(-20, 40, 0);
    let sink = connect(&mut world, 1, overworld, center);

    let expected: BTreeSet<_> = ChunkWindow::around(center, 1, 0, SYNC_CHUNK_SIZE).into_iter().collect();
    let packets = sink.take();
    assert_eq!(packets.len(), expected.len());
    assert_eq!(chunk_windows(&packets), expected);
}

#[test]
fn test_tile_change_reaches_every_watcher_once_per_tick() {
    let (mut world, overworld) = world();
    let near = connect(&mut world, 1, overworld, Coordinate::new(8, 8, 0));
    let also_near = connect(&mut world, 2, overworld, Coordinate::new(20, 8, 0));
    let far = connect(&mut world, 3, overworld, Coordinate::new(500, 500, 0));
    for sink in [&near, &also_near, &far] {
        sink.take();
    }

    for x in 2..6 {
        world.place_tile(overworld, Coordinate::new(x, 4, 0), "grass", DEFAULT_LAYER).unwrap();
    }
    assert_eq!(world.flush_changes(), 2);

    let packets = near.take();
    assert_eq!(packets.len(), 1);
    match &packets[0] {
        Packet::MapChunk(chunk) => {
            assert_eq!(chunk.window, ChunkWindow::new(0, 0, 0, SYNC_CHUNK_SIZE, SYNC_CHUNK_SIZE));
            let grass = world.registries().tile_id("grass").unwrap();
            assert_eq!(chunk.tiles[(4 * SYNC_CHUNK_SIZE + 3) as usize], grass);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(also_near.take().len(), 1);
    assert!(far.is_empty());
}

#[test]
fn test_camera_walk_removes_then_adds() {
    let (mut world, overworld) = world();
    let sink = connect(&mut world, 1, overworld, Coordinate::new(8, 8, 0));
    sink.take();

    // one window east: a column of three leaves, a column of three enters
    let report = world.move_player_camera(ConnectionId(1), Coordinate::new(24, 8, 0)).unwrap();
    assert_eq!(report.chunks_removed, 3);
    assert_eq!(report.chunks_added, 3);

    let packets = sink.take();
    let first_add = packets.iter().position(|p| matches!(p, Packet::MapChunk(_))).unwrap();
    let last_remove = packets.iter().rposition(|p| matches!(p, Packet::RemoveMapChunk(_))).unwrap();
    assert!(last_remove < first_add);

    // same window: nothing to do
    assert!(world
        .move_player_camera(ConnectionId(1), Coordinate::new(25, 9, 0))
        .unwrap()
        .is_empty());
    assert!(sink.is_empty());
}

#[test]
fn test_merged_fragment_is_pushed_at_tick_end() {
    let (mut world, overworld) = world();
    let sink = connect(&mut world, 1, overworld, Coordinate::new(8, 8, 0));
    sink.take();

    let stone = world.registries().tile_id("stone").unwrap();
    let mut fragment = MapTree::new();
    fragment.place_tile(Coordinate::new(1, 1, 0), stone, DEFAULT_LAYER);
    fragment.place_tile(Coordinate::new(1, 1, 0), stone, DEFAULT_LAYER);
    let fragment = MapTree::from_json(&fragment.to_json().unwrap()).unwrap();

    world.merge_tree(overworld, &fragment).unwrap();
    assert_eq!(world.flush_changes(), 1);
    match sink.take().as_slice() {
        [Packet::MapChunk(chunk)] => {
            assert_eq!(chunk.tiles[(SYNC_CHUNK_SIZE + 1) as usize], stone);
            assert_eq!(chunk.additional.len(), 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}

fn stack_stone(world: &mut WorldState, dimension: DimensionId, per_cell: usize) {
    for dy in 0..SYNC_CHUNK_SIZE {
        for dx in 0..SYNC_CHUNK_SIZE {
            for _ in 0..per_cell {
                assert!(world.place_tile(dimension, Coordinate::new(dx, dy, 0), "stone", "decor").unwrap());
            }
        }
    }
}

#[test]
fn test_window_too_large_for_a_frame_is_withdrawn_then_restored() {
    let (mut world, overworld) = world();
    let sink = connect(&mut world, 1, overworld, Coordinate::new(8, 8, 0));
    sink.take();
    let crowded = ChunkWindow::new(0, 0, 0, SYNC_CHUNK_SIZE, SYNC_CHUNK_SIZE);

    // 25 stones per cell: 6144 overlays do not fit one frame
    stack_stone(&mut world, overworld, 25);
    assert_eq!(world.flush_changes(), 8);
    let packets = sink.take();
    assert!(packets.iter().all(|p| encode_frame(p).is_ok()));
    assert_eq!(count(&packets, |p| matches!(p, Packet::MapChunk(_))), 8);
    assert!(!chunk_windows(&packets).contains(&crowded));
    assert_eq!(
        packets
            .iter()
            .filter(|p| matches!(p, Packet::RemoveMapChunk(remove) if remove.window == crowded))
            .count(),
        1
    );

    // thinned to 19 per cell the window comes back on the next flush
    for dy in 0..SYNC_CHUNK_SIZE {
        for dx in 0..SYNC_CHUNK_SIZE {
            for _ in 0..6 {
                assert!(world.remove_tile(overworld, Coordinate::new(dx, dy, 0), "stone", "decor").unwrap());
            }
        }
    }
    assert_eq!(world.flush_changes(), 9);
    let packets = sink.take();
    assert_eq!(count(&packets, |p| matches!(p, Packet::RemoveMapChunk(_))), 0);
    let restored = packets
        .iter()
        .find_map(|p| match p {
            Packet::MapChunk(chunk) if chunk.window == crowded => Some(chunk),
            _ => None,
        })
        .unwrap();
    assert_eq!(restored.additional.len(), 18 * 256);
    assert!(encode_frame(&Packet::MapChunk(restored.clone())).is_ok());
}

#[test]
fn test_malformed_fragment_is_rejected_before_it_reaches_a_dimension() {
    let (mut world, overworld) = world();
    let sink = connect(&mut world, 1, overworld, Coordinate::new(8, 8, 0));
    sink.take();

    for json in [
        r#"{"layers":[],"base_layer":3,"sparse_layer":4}"#,
        r#"{"layers":[],"base_layer":0,"sparse_layer":0}"#,
    ] {
        assert!(matches!(MapTree::from_json(json), Err(WorldError::InvalidMap(_))), "{json}");
    }

    // the dimension keeps serving default-layer edits
    assert!(world.place_tile(overworld, Coordinate::new(1, 1, 0), "grass", DEFAULT_LAYER).unwrap());
    assert_eq!(world.flush_changes(), 1);
    assert_eq!(sink.take().len(), 1);
}

// ============================================================
// Entities
// ============================================================

#[test]
fn test_entity_walks_out_of_one_view_into_another() {
    let (mut world, overworld) = world();
    let west = connect(&mut world, 1, overworld, Coordinate::new(0, 0, 0));
    let east = connect(&mut world, 2, overworld, Coordinate::new(400, 0, 0));

    let id = world.spawn_entity(overworld, "player", Coordinate::new(0, 0, 0)).unwrap();
    west.take();
    east.take();

    world.teleport_entity(id, Coordinate::new(400, 0, 0)).unwrap();
    let west_packets = west.take();
    let east_packets = east.take();
    assert!(matches!(west_packets.as_slice(), [Packet::RemoveEntity(p)] if p.network_id == id));
    assert!(matches!(east_packets.as_slice(), [Packet::Entity(p)] if p.network_id == id));

    world.move_entity(id, Coordinate::new(401, 0, 0), None).unwrap();
    assert!(west.is_empty());
    assert_eq!(count(&east.take(), |p| matches!(p, Packet::MoveEntity(_))), 1);
}

#[test]
fn test_followed_entity_drives_camera_across_dimensions() {
    let (mut world, overworld) = world();
    let nether = world.create_dimension("nether", MapTree::new()).unwrap();
    let sink = connect(&mut world, 1, overworld, Coordinate::new(0, 0, 0));
    let id = world.spawn_entity(overworld, "player", Coordinate::new(0, 0, 0)).unwrap();
    world.follow_entity(ConnectionId(1), id).unwrap();
    sink.take();

    world.change_dimension(id, nether, Coordinate::new(100, 100, 0)).unwrap();
    let packets = sink.take();
    assert_eq!(count(&packets, |p| matches!(p, Packet::RemoveMapChunk(_))), 9);
    assert_eq!(count(&packets, |p| matches!(p, Packet::MapChunk(_))), 9);
    assert_eq!(count(&packets, |p| matches!(p, Packet::Entity(_))), 1);
    assert_eq!(world.dimension(overworld).unwrap().sync().watcher_count(), 0);
    assert_eq!(world.dimension(nether).unwrap().sync().watcher_count(), 1);

    let player = world.player(ConnectionId(1)).unwrap();
    assert_eq!(player.camera().unwrap().dimension, nether);
    assert!(player.is_entity_synced(id));
}

#[test]
fn test_disconnect_then_reconnect_starts_fresh() {
    let (mut world, overworld) = world();
    let sink = connect(&mut world, 1, overworld, Coordinate::new(0, 0, 0));
    world.spawn_entity(overworld, "player", Coordinate::new(3, 3, 0)).unwrap();
    assert_eq!(sink.take().len(), 10);

    assert!(world.disconnect_player(ConnectionId(1)));
    assert!(sink.is_empty());
    assert!(!world.disconnect_player(ConnectionId(1)));

    let again = connect(&mut world, 1, overworld, Coordinate::new(0, 0, 0));
    assert_eq!(again.take().len(), 10);
}
