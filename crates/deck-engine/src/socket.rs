//! TCP control socket.  Frames are `Message`s (4-byte length + JSON); a
//! client sends `Command`s and receives every engine broadcast, starting
//! with a `Hello` carrying the current snapshot.

use deck_proto::protocol::{Broadcast, Message, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::engine::EngineHandle;
use crate::events::BroadcastMessage;

/// Largest command payload a client may send.
const MAX_FRAME_LEN: usize = 1024 * 1024;

pub async fn bind(bind_address: &str, port: u16) -> anyhow::Result<TcpListener> {
    let addr = format!("{}:{}", bind_address, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind control socket {}: {}", addr, e))?;
    info!("control socket listening at {}", addr);
    Ok(listener)
}

pub fn serve(listener: TcpListener, engine: EngineHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut client_id = 0usize;
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("client {} connected from {}", id, peer);
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        handle_client(stream, id, engine).await;
                        info!("client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(stream: TcpStream, client_id: usize, engine: EngineHandle) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut broadcast_rx = engine.subscribe();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    let hello = Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state: engine.snapshot().await,
    };
    if write_frame(&mut write_half, hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        debug!("client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);
                        loop {
                            let frame_len = match complete_frame(&read_buf) {
                                Ok(Some(len)) => len,
                                Ok(None) => break,
                                Err(len) => {
                                    warn!("client {} announced a {} byte frame, closing", client_id, len);
                                    return;
                                }
                            };
                            match Message::decode(&read_buf[..frame_len]) {
                                Ok((Message::Command(cmd), _)) => {
                                    debug!("client {} sent command: {:?}", client_id, cmd);
                                    if engine.send(cmd).is_err() {
                                        warn!("engine gone, closing client {}", client_id);
                                        return;
                                    }
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    warn!("client {} sent an unreadable frame: {}", client_id, e);
                                }
                            }
                            read_buf.drain(..frame_len);
                        }
                    }
                    Err(e) => {
                        error!("read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let broadcast = match msg {
                    Ok(BroadcastMessage::StateUpdated) => Broadcast::State { data: engine.snapshot().await },
                    Ok(other) => match to_wire(other) {
                        Some(broadcast) => broadcast,
                        None => continue,
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("client {} missed {} broadcast messages", client_id, n);
                        Broadcast::State { data: engine.snapshot().await }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if write_frame(&mut write_half, broadcast).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Length of the frame at the head of `buf` once it is fully buffered.
/// `Err` carries a payload length over [`MAX_FRAME_LEN`].
fn complete_frame(buf: &[u8]) -> Result<Option<usize>, usize> {
    let Some(header) = buf.get(..4) else {
        return Ok(None);
    };
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(len);
    }
    Ok((buf.len() >= 4 + len).then_some(4 + len))
}

/// Wire form of a broadcast.  `StateUpdated` has none of its own; the
/// caller answers it with the current snapshot.
fn to_wire(message: BroadcastMessage) -> Option<Broadcast> {
    let broadcast = match message {
        BroadcastMessage::StateUpdated => return None,
        BroadcastMessage::Title(title) => Broadcast::Title { title },
        BroadcastMessage::Progress {
            elapsed_secs,
            total_secs,
        } => Broadcast::Progress {
            elapsed_secs,
            total_secs,
        },
        BroadcastMessage::Status(message) => Broadcast::Status { message },
        BroadcastMessage::Error { class, message } => Broadcast::Error { class, message },
        BroadcastMessage::Description { path, text } => Broadcast::Description { path, text },
        BroadcastMessage::Log(message) => Broadcast::Log { message },
    };
    Some(broadcast)
}

async fn write_frame(
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
    broadcast: Broadcast,
) -> anyhow::Result<()> {
    let encoded = Message::Broadcast(broadcast).encode()?;
    write_half.write_all(&encoded).await?;
    Ok(())
}
