//! Framing and the discriminator → decoder registry.

use bytes::{Buf, BufMut, BytesMut};
use std::collections::HashMap;

use super::{
    EntityPacket, KeepAlivePacket, MapChunkPacket, MoveEntityPacket, MoveRequestPacket, Packet,
    RemoveEntityPacket, RemoveMapChunkPacket, TurnRequestPacket, WirePacket,
};
use crate::constants::{FRAME_HEADER_LEN, MAX_FRAME_PAYLOAD};
use crate::error::WireError;

type DecodeFn = fn(&mut BytesMut) -> Result<Packet, WireError>;

fn decode_as<P: WirePacket + Into<Packet>>(buf: &mut BytesMut) -> Result<Packet, WireError> {
    P::decode(buf).map(Into::into)
}

/// Maps packet discriminators to body decoders
#[derive(Debug, Clone, Default)]
pub struct PacketRegistry {
    decoders: HashMap<u8, DecodeFn>,
}

impl PacketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every packet this crate defines
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<MapChunkPacket>();
        registry.register::<RemoveMapChunkPacket>();
        registry.register::<EntityPacket>();
        registry.register::<MoveEntityPacket>();
        registry.register::<RemoveEntityPacket>();
        registry.register::<MoveRequestPacket>();
        registry.register::<TurnRequestPacket>();
        registry.register::<KeepAlivePacket>();
        registry
    }

    pub fn register<P: WirePacket + Into<Packet>>(&mut self) {
        self.decoders.insert(P::ID, decode_as::<P>);
    }

    pub fn contains(&self, id: u8) -> bool {
        self.decoders.contains_key(&id)
    }

    /// Decode a full body; leftover bytes are an error
    pub fn decode(&self, id: u8, body: &mut BytesMut) -> Result<Packet, WireError> {
        let decode = self.decoders.get(&id).ok_or(WireError::UnknownPacket(id))?;
        let packet = decode(body)?;
        if body.has_remaining() {
            return Err(WireError::TrailingBytes {
                packet: id,
                remaining: body.remaining(),
            });
        }
        Ok(packet)
    }
}

/// Encode `packet` as a complete length-prefixed frame
pub fn encode_frame(packet: &Packet) -> Result<BytesMut, WireError> {
    let mut payload = BytesMut::new();
    payload.put_u8(packet.id());
    packet.encode_body(&mut payload)?;
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(WireError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_FRAME_PAYLOAD,
        });
    }

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_u16(payload.len() as u16);
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Incremental frame decoder for a byte stream
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    registry: PacketRegistry,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(PacketRegistry::with_defaults())
    }
}

impl FrameDecoder {
    pub fn new(registry: PacketRegistry) -> Self {
        Self { registry }
    }

    /// Pull one packet off the front of `buf`.
    ///
    /// Returns `Ok(None)` until a whole frame has arrived; consumed bytes are
    /// removed from `buf`, partial frames are left in place.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Packet>, WireError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Err(WireError::PayloadTooLarge {
                size: len,
                max: MAX_FRAME_PAYLOAD,
            });
        }
        if len == 0 {
            return Err(WireError::InvalidLength("empty frame".to_string()));
        }
        if buf.len() < FRAME_HEADER_LEN + len {
            buf.reserve(FRAME_HEADER_LEN + len - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_LEN);
        let mut payload = buf.split_to(len);
        let id = payload.get_u8();
        self.registry.decode(id, &mut payload).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::{ChunkWindow, Coordinate};
    use crate::entity::NetworkId;
    use crate::wire::AdditionalTile;

    fn chunk_packet() -> Packet {
        Packet::MapChunk(MapChunkPacket {
            window: ChunkWindow::new(-16, 32, 1, 2, 2),
            tiles: vec![1, 0, 3, 4],
            additional: vec![AdditionalTile { dx: 1, dy: 0, tile: 9 }],
        })
    }

    #[test]
    fn test_frame_header_counts_type_byte() {
        let frame = encode_frame(&Packet::KeepAlive(KeepAlivePacket)).unwrap();
        assert_eq!(&frame[..], &[0, 1, KeepAlivePacket::ID]);
    }

    #[test]
    fn test_map_chunk_frame_roundtrip() {
        let packet = chunk_packet();
        let mut buf = encode_frame(&packet).unwrap();
        // 5 window ints + 4 tiles + count + one overlay entry
        assert_eq!(buf.len(), 2 + 1 + 20 + 16 + 2 + 6);
        let decoded = FrameDecoder::default().decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(packet));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_entity_components_roundtrip() {
        let packet = Packet::Entity(EntityPacket {
            network_id: NetworkId(7),
            entity_id: 2,
            coordinate: Coordinate::new(1, -2, 0),
            facing: 90.0,
            components: vec![("hp".into(), "10".into()), ("name".into(), "\"Ada\"".into())],
        });
        let mut buf = encode_frame(&packet).unwrap();
        assert_eq!(FrameDecoder::default().decode(&mut buf).unwrap(), Some(packet));
    }

    #[test]
    fn test_partial_frames_wait_for_more_bytes() {
        let decoder = FrameDecoder::default();
        let first = encode_frame(&chunk_packet()).unwrap();
        let second = encode_frame(&Packet::RemoveEntity(RemoveEntityPacket {
            network_id: NetworkId(3),
        }))
        .unwrap();

        let mut stream = BytesMut::new();
        stream.extend_from_slice(&first[..1]);
        assert_eq!(decoder.decode(&mut stream).unwrap(), None);
        stream.extend_from_slice(&first[1..10]);
        assert_eq!(decoder.decode(&mut stream).unwrap(), None);
        stream.extend_from_slice(&first[10..]);
        stream.extend_from_slice(&second);

        assert_eq!(decoder.decode(&mut stream).unwrap(), Some(chunk_packet()));
        assert!(matches!(decoder.decode(&mut stream).unwrap(), Some(Packet::RemoveEntity(_))));
        assert_eq!(decoder.decode(&mut stream).unwrap(), None);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let side = 128;
        let packet = Packet::MapChunk(MapChunkPacket {
            window: ChunkWindow::new(0, 0, 0, side, side),
            tiles: vec![1; (side * side) as usize],
            additional: vec![],
        });
        assert!(matches!(encode_frame(&packet), Err(WireError::PayloadTooLarge { .. })));

        let mut buf = BytesMut::from(&[0x80u8, 0x00, 1][..]);
        assert!(matches!(
            FrameDecoder::default().decode(&mut buf),
            Err(WireError::PayloadTooLarge { size: 32768, .. })
        ));
    }

    #[test]
    fn test_chunk_size_check_agrees_with_encoder() {
        let overlays = |count: usize| MapChunkPacket {
            window: ChunkWindow::new(0, 0, 0, 16, 16),
            tiles: vec![1; 256],
            additional: vec![AdditionalTile { dx: 3, dy: 4, tile: 2 }; count],
        };

        // 1047 fixed bytes, 6 per overlay
        let fits = overlays(5286);
        assert_eq!(fits.payload_len(), 32763);
        assert!(fits.check_frame().is_ok());
        let frame = encode_frame(&Packet::MapChunk(fits.clone())).unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_LEN + fits.payload_len());

        let too_big = overlays(5287);
        assert_eq!(
            too_big.check_frame(),
            Err(WireError::PayloadTooLarge { size: 32769, max: MAX_FRAME_PAYLOAD })
        );
        assert!(encode_frame(&Packet::MapChunk(too_big)).is_err());
    }

    #[test]
    fn test_unknown_discriminator() {
        let mut buf = BytesMut::from(&[0u8, 1, 200][..]);
        assert_eq!(FrameDecoder::default().decode(&mut buf), Err(WireError::UnknownPacket(200)));
    }

    #[test]
    fn test_truncated_and_trailing_bodies() {
        let decoder = FrameDecoder::default();
        // turn request needs 4 body bytes
        let mut short = BytesMut::from(&[0u8, 3, TurnRequestPacket::ID, 0, 0][..]);
        assert_eq!(decoder.decode(&mut short), Err(WireError::Truncated { needed: 2 }));

        let mut long = BytesMut::from(&[0u8, 2, KeepAlivePacket::ID, 9][..]);
        assert_eq!(
            decoder.decode(&mut long),
            Err(WireError::TrailingBytes {
                packet: KeepAlivePacket::ID,
                remaining: 1
            })
        );
    }

    #[test]
    fn test_mismatched_tile_count_rejected() {
        let packet = Packet::MapChunk(MapChunkPacket {
            window: ChunkWindow::new(0, 0, 0, 2, 2),
            tiles: vec![1, 2, 3],
            additional: vec![],
        });
        assert!(matches!(encode_frame(&packet), Err(WireError::InvalidLength(_))));
    }
}
