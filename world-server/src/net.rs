//! TCP Transport
//!
//! One reader and one writer task per connection:
//! - reader: idle timeout, incremental `FrameDecoder`, decoded packets go to
//!   the tick as `ServerCommand::Inbound`
//! - writer: drains the connection's outbound channel, one frame per packet
//!
//! Any read failure closes that connection only.

use bytes::BytesMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use world_core::error::WireError;
use world_core::sync::ConnectionId;
use world_core::wire::{encode_frame, FrameDecoder, Packet};

use crate::bridge::{CommandSender, ServerCommand};
use crate::metrics::ServerMetrics;

/// Why a connection's reader stopped
#[derive(Debug, thiserror::Error)]
pub enum CloseReason {
    #[error("peer closed the connection")]
    Eof,
    #[error("idle for longer than {0:?}")]
    IdleTimeout(Duration),
    #[error("malformed frame: {0}")]
    Decode(#[from] WireError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tick bridge is gone")]
    BridgeClosed,
}

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub idle_timeout: Duration,
}

/// Hands out connection ids, monotonic from 1
#[derive(Debug)]
pub struct ConnectionIds(AtomicU64);

impl Default for ConnectionIds {
    fn default() -> Self {
        Self(AtomicU64::new(1))
    }
}

impl ConnectionIds {
    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Accept loop; runs until the listener fails
pub async fn serve(
    listener: TcpListener,
    commands: CommandSender,
    metrics: Arc<ServerMetrics>,
    config: NetConfig,
) -> std::io::Result<()> {
    let ids = ConnectionIds::default();
    info!(addr = ?listener.local_addr().ok(), "Game transport listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "Could not disable Nagle");
        }
        let connection = ids.next();
        debug!(%connection, %peer, "Accepted connection");
        tokio::spawn(handle_connection(
            stream,
            connection,
            commands.clone(),
            metrics.clone(),
            config.clone(),
        ));
    }
}

async fn handle_connection(
    stream: TcpStream,
    connection: ConnectionId,
    commands: CommandSender,
    metrics: Arc<ServerMetrics>,
    config: NetConfig,
) {
    let (reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    if commands
        .send(ServerCommand::ConnectionOpened {
            connection,
            outbound: outbound_tx,
        })
        .is_err()
    {
        warn!(%connection, "Tick bridge closed; refusing connection");
        return;
    }
    metrics.record_connection_opened();

    let writer_task = tokio::spawn(write_loop(writer, outbound_rx, connection, metrics.clone()));
    let reason = read_loop(reader, connection, &commands, &metrics, config.idle_timeout).await;
    match &reason {
        CloseReason::Eof => info!(%connection, "Connection closed"),
        other => warn!(%connection, reason = %other, "Connection dropped"),
    }

    metrics.record_connection_closed();
    let _ = commands.send(ServerCommand::ConnectionClosed { connection });
    writer_task.abort();
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    connection: ConnectionId,
    commands: &CommandSender,
    metrics: &ServerMetrics,
    idle_timeout: Duration,
) -> CloseReason {
    let decoder = FrameDecoder::default();
    let mut buffer = BytesMut::with_capacity(4096);
    loop {
        loop {
            match decoder.decode(&mut buffer) {
                Ok(Some(packet)) => {
                    metrics.record_packet_in();
                    if commands.send(ServerCommand::Inbound { connection, packet }).is_err() {
                        return CloseReason::BridgeClosed;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    metrics.record_decode_error();
                    return CloseReason::Decode(e);
                }
            }
        }

        match tokio::time::timeout(idle_timeout, reader.read_buf(&mut buffer)).await {
            Err(_) => return CloseReason::IdleTimeout(idle_timeout),
            Ok(Ok(0)) => return CloseReason::Eof,
            Ok(Ok(read)) => metrics.record_read(read),
            Ok(Err(e)) => return CloseReason::Io(e),
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
    connection: ConnectionId,
    metrics: Arc<ServerMetrics>,
) {
    while let Some(packet) = outbound.recv().await {
        let frame = match encode_frame(&packet) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%connection, packet = packet.name(), error = %e, "Dropping unencodable packet");
                metrics.record_dropped();
                continue;
            }
        };
        if let Err(e) = writer.write_all(&frame).await {
            debug!(%connection, error = %e, "Writer stopped");
            break;
        }
        metrics.record_outbound(frame.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_monotonic() {
        let ids = ConnectionIds::default();
        assert_eq!(ids.next(), ConnectionId(1));
        assert_eq!(ids.next(), ConnectionId(2));
    }

    #[test]
    fn test_close_reason_messages() {
        let reason = CloseReason::from(WireError::UnknownPacket(99));
        assert_eq!(reason.to_string(), "malformed frame: Unknown packet type: 99");
        assert_eq!(CloseReason::Eof.to_string(), "peer closed the connection");
    }
}
