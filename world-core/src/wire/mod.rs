//! Wire Envelope
//!
//! Frame layout:
//! ```text
//! [len: u16 BE][type: u8][body...]      len = 1 + body.len() <= 32767
//! ```
//! All integers are big-endian. Strings are a `u16` byte length followed by
//! UTF-8. Relative overlay coordinates are two unsigned bytes.
//!
//! Packet families:
//! - outbound (server → client): map chunks, entities, moves, removals
//! - inbound (client → server): move/turn requests, keep-alive

mod codec;

pub use codec::{encode_frame, FrameDecoder, PacketRegistry};

use bytes::{Buf, BufMut, BytesMut};

use crate::constants::MAX_FRAME_PAYLOAD;
use crate::coords::{ChunkWindow, Coordinate};
use crate::entity::NetworkId;
use crate::error::WireError;
use crate::layer::TileId;

// ============================================================================
// Primitive readers / writers
// ============================================================================

fn need(buf: &mut impl Buf, bytes: usize) -> Result<(), WireError> {
    if buf.remaining() < bytes {
        return Err(WireError::Truncated {
            needed: bytes - buf.remaining(),
        });
    }
    Ok(())
}

fn get_i32(buf: &mut impl Buf) -> Result<i32, WireError> {
    need(buf, 4)?;
    Ok(buf.get_i32())
}

fn get_u32(buf: &mut impl Buf) -> Result<u32, WireError> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

fn get_i16(buf: &mut impl Buf) -> Result<i16, WireError> {
    need(buf, 2)?;
    Ok(buf.get_i16())
}

fn get_u8(buf: &mut impl Buf) -> Result<u8, WireError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_f32(buf: &mut impl Buf) -> Result<f32, WireError> {
    need(buf, 4)?;
    Ok(buf.get_f32())
}

fn get_count(buf: &mut impl Buf) -> Result<usize, WireError> {
    let count = get_i16(buf)?;
    usize::try_from(count).map_err(|_| WireError::InvalidLength(format!("negative count {count}")))
}

fn put_count(buf: &mut BytesMut, count: usize) -> Result<(), WireError> {
    let count = i16::try_from(count).map_err(|_| WireError::InvalidLength(format!("count {count} exceeds i16")))?;
    buf.put_i16(count);
    Ok(())
}

fn put_string(buf: &mut BytesMut, value: &str) -> Result<(), WireError> {
    let len = u16::try_from(value.len())
        .map_err(|_| WireError::InvalidLength(format!("string of {} bytes", value.len())))?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_string(buf: &mut impl Buf) -> Result<String, WireError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    String::from_utf8(raw).map_err(|e| WireError::InvalidString(e.to_string()))
}

fn put_coordinate(buf: &mut BytesMut, coordinate: Coordinate) {
    buf.put_i32(coordinate.x);
    buf.put_i32(coordinate.y);
    buf.put_i32(coordinate.z);
}

fn get_coordinate(buf: &mut impl Buf) -> Result<Coordinate, WireError> {
    Ok(Coordinate::new(get_i32(buf)?, get_i32(buf)?, get_i32(buf)?))
}

fn put_window(buf: &mut BytesMut, window: &ChunkWindow) {
    buf.put_i32(window.x);
    buf.put_i32(window.y);
    buf.put_i32(window.z);
    buf.put_i32(window.width);
    buf.put_i32(window.height);
}

fn get_window(buf: &mut impl Buf) -> Result<ChunkWindow, WireError> {
    Ok(ChunkWindow::new(
        get_i32(buf)?,
        get_i32(buf)?,
        get_i32(buf)?,
        get_i32(buf)?,
        get_i32(buf)?,
    ))
}

fn get_network_id(buf: &mut impl Buf) -> Result<NetworkId, WireError> {
    Ok(NetworkId(get_u32(buf)?))
}

// ============================================================================
// Packet trait
// ============================================================================

/// A typed packet body with a fixed discriminator
pub trait WirePacket: Sized {
    const ID: u8;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError>;

    fn decode(buf: &mut BytesMut) -> Result<Self, WireError>;
}

// ============================================================================
// Outbound packets
// ============================================================================

/// One overlay tile, relative to the chunk origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdditionalTile {
    pub dx: u8,
    pub dy: u8,
    pub tile: TileId,
}

/// Materialized window: row-major base tiles plus overlays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapChunkPacket {
    pub window: ChunkWindow,
    pub tiles: Vec<TileId>,
    pub additional: Vec<AdditionalTile>,
}

impl WirePacket for MapChunkPacket {
    const ID: u8 = 1;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        let expected = (self.window.width * self.window.height).max(0) as usize;
        if self.tiles.len() != expected {
            return Err(WireError::InvalidLength(format!(
                "{} tiles for a {}x{} window",
                self.tiles.len(),
                self.window.width,
                self.window.height
            )));
        }
        put_window(buf, &self.window);
        for tile in &self.tiles {
            buf.put_u32(*tile);
        }
        put_count(buf, self.additional.len())?;
        for entry in &self.additional {
            buf.put_u8(entry.dx);
            buf.put_u8(entry.dy);
            buf.put_u32(entry.tile);
        }
        Ok(())
    }

    fn decode(buf: &mut BytesMut) -> Result<Self, WireError> {
        let window = get_window(buf)?;
        if window.width < 0 || window.height < 0 {
            return Err(WireError::InvalidLength(format!("window {window}")));
        }
        let cells = (window.width as usize) * (window.height as usize);
        let bytes = cells
            .checked_mul(4)
            .ok_or_else(|| WireError::InvalidLength(format!("window {window}")))?;
        need(buf, bytes)?;
        let tiles = (0..cells).map(|_| buf.get_u32()).collect();
        let count = get_count(buf)?;
        let mut additional = Vec::with_capacity(count);
        for _ in 0..count {
            additional.push(AdditionalTile {
                dx: get_u8(buf)?,
                dy: get_u8(buf)?,
                tile: get_u32(buf)?,
            });
        }
        Ok(Self {
            window,
            tiles,
            additional,
        })
    }
}

impl MapChunkPacket {
    /// Frame payload size: discriminator, window, base tiles, overlay list
    pub fn payload_len(&self) -> usize {
        1 + 20 + 4 * self.tiles.len() + 2 + 6 * self.additional.len()
    }

    /// Fails if the packet cannot go out as a single frame
    pub fn check_frame(&self) -> Result<(), WireError> {
        if i16::try_from(self.additional.len()).is_err() {
            return Err(WireError::InvalidLength(format!(
                "count {} exceeds i16",
                self.additional.len()
            )));
        }
        let size = self.payload_len();
        if size > MAX_FRAME_PAYLOAD {
            return Err(WireError::PayloadTooLarge {
                size,
                max: MAX_FRAME_PAYLOAD,
            });
        }
        Ok(())
    }
}

/// Client must discard a previously sent window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveMapChunkPacket {
    pub window: ChunkWindow,
}

impl WirePacket for RemoveMapChunkPacket {
    const ID: u8 = 2;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        put_window(buf, &self.window);
        Ok(())
    }

    fn decode(buf: &mut BytesMut) -> Result<Self, WireError> {
        Ok(Self {
            window: get_window(buf)?,
        })
    }
}

/// Entity creation, with its dynamic components as JSON strings
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPacket {
    pub network_id: NetworkId,
    pub entity_id: u32,
    pub coordinate: Coordinate,
    pub facing: f32,
    pub components: Vec<(String, String)>,
}

impl WirePacket for EntityPacket {
    const ID: u8 = 3;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32(self.network_id.0);
        buf.put_u32(self.entity_id);
        put_coordinate(buf, self.coordinate);
        buf.put_f32(self.facing);
        put_count(buf, self.components.len())?;
        for (key, value) in &self.components {
            put_string(buf, key)?;
            put_string(buf, value)?;
        }
        Ok(())
    }

    fn decode(buf: &mut BytesMut) -> Result<Self, WireError> {
        let network_id = get_network_id(buf)?;
        let entity_id = get_u32(buf)?;
        let coordinate = get_coordinate(buf)?;
        let facing = get_f32(buf)?;
        let count = get_count(buf)?;
        let mut components = Vec::with_capacity(count);
        for _ in 0..count {
            components.push((get_string(buf)?, get_string(buf)?));
        }
        Ok(Self {
            network_id,
            entity_id,
            coordinate,
            facing,
            components,
        })
    }
}

/// Interpolated move; teleports and turns use a zero duration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveEntityPacket {
    pub network_id: NetworkId,
    pub start: Coordinate,
    pub end: Coordinate,
    pub facing: f32,
    pub duration: f32,
}

impl WirePacket for MoveEntityPacket {
    const ID: u8 = 4;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32(self.network_id.0);
        put_coordinate(buf, self.start);
        put_coordinate(buf, self.end);
        buf.put_f32(self.facing);
        buf.put_f32(self.duration);
        Ok(())
    }

    fn decode(buf: &mut BytesMut) -> Result<Self, WireError> {
        Ok(Self {
            network_id: get_network_id(buf)?,
            start: get_coordinate(buf)?,
            end: get_coordinate(buf)?,
            facing: get_f32(buf)?,
            duration: get_f32(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveEntityPacket {
    pub network_id: NetworkId,
}

impl WirePacket for RemoveEntityPacket {
    const ID: u8 = 5;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32(self.network_id.0);
        Ok(())
    }

    fn decode(buf: &mut BytesMut) -> Result<Self, WireError> {
        Ok(Self {
            network_id: get_network_id(buf)?,
        })
    }
}

// ============================================================================
// Inbound packets
// ============================================================================

/// Client asks to move its followed entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveRequestPacket {
    pub target: Coordinate,
    pub facing: f32,
}

impl WirePacket for MoveRequestPacket {
    const ID: u8 = 16;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        put_coordinate(buf, self.target);
        buf.put_f32(self.facing);
        Ok(())
    }

    fn decode(buf: &mut BytesMut) -> Result<Self, WireError> {
        Ok(Self {
            target: get_coordinate(buf)?,
            facing: get_f32(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnRequestPacket {
    pub facing: f32,
}

impl WirePacket for TurnRequestPacket {
    const ID: u8 = 17;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_f32(self.facing);
        Ok(())
    }

    fn decode(buf: &mut BytesMut) -> Result<Self, WireError> {
        Ok(Self {
            facing: get_f32(buf)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlivePacket;

impl WirePacket for KeepAlivePacket {
    const ID: u8 = 18;

    fn encode(&self, _buf: &mut BytesMut) -> Result<(), WireError> {
        Ok(())
    }

    fn decode(_buf: &mut BytesMut) -> Result<Self, WireError> {
        Ok(Self)
    }
}

// ============================================================================
// Packet enum
// ============================================================================

/// Every packet the envelope can carry
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    MapChunk(MapChunkPacket),
    RemoveMapChunk(RemoveMapChunkPacket),
    Entity(EntityPacket),
    MoveEntity(MoveEntityPacket),
    RemoveEntity(RemoveEntityPacket),
    MoveRequest(MoveRequestPacket),
    TurnRequest(TurnRequestPacket),
    KeepAlive(KeepAlivePacket),
}

impl Packet {
    pub fn id(&self) -> u8 {
        match self {
            Packet::MapChunk(_) => MapChunkPacket::ID,
            Packet::RemoveMapChunk(_) => RemoveMapChunkPacket::ID,
            Packet::Entity(_) => EntityPacket::ID,
            Packet::MoveEntity(_) => MoveEntityPacket::ID,
            Packet::RemoveEntity(_) => RemoveEntityPacket::ID,
            Packet::MoveRequest(_) => MoveRequestPacket::ID,
            Packet::TurnRequest(_) => TurnRequestPacket::ID,
            Packet::KeepAlive(_) => KeepAlivePacket::ID,
        }
    }

    /// Body without the type byte
    pub fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        match self {
            Packet::MapChunk(p) => p.encode(buf),
            Packet::RemoveMapChunk(p) => p.encode(buf),
            Packet::Entity(p) => p.encode(buf),
            Packet::MoveEntity(p) => p.encode(buf),
            Packet::RemoveEntity(p) => p.encode(buf),
            Packet::MoveRequest(p) => p.encode(buf),
            Packet::TurnRequest(p) => p.encode(buf),
            Packet::KeepAlive(p) => p.encode(buf),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Packet::MapChunk(_) => "map_chunk",
            Packet::RemoveMapChunk(_) => "remove_map_chunk",
            Packet::Entity(_) => "entity",
            Packet::MoveEntity(_) => "move_entity",
            Packet::RemoveEntity(_) => "remove_entity",
            Packet::MoveRequest(_) => "move_request",
            Packet::TurnRequest(_) => "turn_request",
            Packet::KeepAlive(_) => "keep_alive",
        }
    }
}

macro_rules! impl_from_packet {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(impl From<$ty> for Packet {
            fn from(packet: $ty) -> Self {
                Packet::$variant(packet)
            }
        })*
    };
}

impl_from_packet! {
    MapChunk => MapChunkPacket,
    RemoveMapChunk => RemoveMapChunkPacket,
    Entity => EntityPacket,
    MoveEntity => MoveEntityPacket,
    RemoveEntity => RemoveEntityPacket,
    MoveRequest => MoveRequestPacket,
    TurnRequest => TurnRequestPacket,
    KeepAlive => KeepAlivePacket,
}
