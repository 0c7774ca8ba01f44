//! Inbound client packets. A rejected move is answered with a zero-duration
//! correction back to the entity's current position.

use tracing::{debug, trace, warn};

use super::WorldState;
use crate::entity::NetworkId;
use crate::error::{WorldError, WorldResult};
use crate::sync::ConnectionId;
use crate::wire::{MoveEntityPacket, MoveRequestPacket, Packet, TurnRequestPacket};

/// What an inbound packet resulted in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Moved,
    Turned,
    /// Move refused; a correction was sent
    Rejected,
    /// Nothing to do (keep-alive, no controlled entity, ...)
    Ignored,
}

impl WorldState {
    pub fn handle_packet(&mut self, connection: ConnectionId, packet: Packet) -> WorldResult<InputOutcome> {
        let player = self
            .players
            .get(&connection)
            .ok_or(WorldError::UnknownConnection(connection))?;
        let controlled = player.follow();

        match packet {
            Packet::KeepAlive(_) => {
                trace!(%connection, "Keep-alive");
                Ok(InputOutcome::Ignored)
            }
            Packet::MoveRequest(request) => match controlled {
                Some(id) => self.handle_move(connection, id, request),
                None => {
                    debug!(%connection, "Move request without a controlled entity");
                    Ok(InputOutcome::Ignored)
                }
            },
            Packet::TurnRequest(TurnRequestPacket { facing }) => match controlled {
                Some(id) => {
                    self.turn_entity(id, facing)?;
                    Ok(InputOutcome::Turned)
                }
                None => Ok(InputOutcome::Ignored),
            },
            other => {
                warn!(%connection, packet = other.name(), "Client sent a server-only packet");
                Ok(InputOutcome::Ignored)
            }
        }
    }

    fn handle_move(&mut self, connection: ConnectionId, id: NetworkId, request: MoveRequestPacket) -> WorldResult<InputOutcome> {
        let entity = self.entities.get(id).ok_or(WorldError::UnknownEntity(id))?;
        let dimension = entity.dimension.ok_or(WorldError::UnknownEntity(id))?;
        let start = entity.coordinate;
        let facing = entity.facing;

        let adjacent = start.z == request.target.z && start.horizontal_distance(&request.target) == 1;
        let allowed = adjacent && {
            let player = self
                .players
                .get(&connection)
                .ok_or(WorldError::UnknownConnection(connection))?;
            !self.is_blocked(dimension, request.target, player.collision())?
        };

        if allowed {
            self.move_entity(id, request.target, Some(request.facing))?;
            return Ok(InputOutcome::Moved);
        }

        debug!(%connection, entity = %id, from = %start, to = %request.target, "Move rejected");
        let correction = Packet::MoveEntity(MoveEntityPacket {
            network_id: id,
            start,
            end: start,
            facing,
            duration: 0.0,
        });
        if let Some(player) = self.players.get_mut(&connection) {
            player.forward_entity_packet(id, correction);
        }
        Ok(InputOutcome::Rejected)
    }
}
