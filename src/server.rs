use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::limiter::ConnectionLimiter;
use crate::protocol::{self, ClientMessage, Frame, ProtocolError, ServerMessage, PROTOCOL_VERSION};
use crate::registry::Registry;
use crate::room::Room;
use crate::{heartbeat, matchmaker, ServerConfig};

type LineReader = Lines<BufReader<OwnedReadHalf>>;

/// Bind-and-run entry point: spawns the matchmaker and heartbeat loops, then
/// accepts sockets forever, one worker task per connection.
pub async fn serve(listener: TcpListener, config: ServerConfig) -> anyhow::Result<()> {
    let (registry, waiting_rx) = Registry::new();
    let limiter = ConnectionLimiter::new(config.max_connections, config.max_per_ip);

    tokio::spawn(matchmaker::run(registry.clone(), waiting_rx));
    tokio::spawn(heartbeat::run(registry.clone(), config.clone()));

    loop {
        let (stream, addr) = listener.accept().await?;
        if let Err(e) = limiter.try_admit(addr.ip()).await {
            warn!("connection rejected from {}: {}", addr, e);
            drop(stream);
            continue;
        }

        let registry = registry.clone();
        let limiter = limiter.clone();
        tokio::spawn(async move {
            handle_connection(stream, addr, registry, limiter).await;
        });
    }
}

/// Per-connection worker: handshake, enqueue for matchmaking, then dispatch
/// inbound messages until the peer goes away or is killed by another task.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Registry,
    limiter: ConnectionLimiter,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half).lines();
    let conn = Arc::new(Connection::new(addr, write_half));
    registry.add_connection(conn.clone()).await;
    info!("new connection from {} ({})", addr, conn.id);

    if handshake(&mut reader, &conn, &registry).await {
        dispatch_loop(&mut reader, &conn, &registry).await;
    }

    cleanup(&registry, &conn).await;
    limiter.release(addr.ip()).await;
}

/// HELLO -> WELCOME -> READY -> WAITING. Any deviation gets one ERROR and
/// the connection is closed without ever reaching the waiting queue.
/// Returns whether the connection was enqueued.
async fn handshake(reader: &mut LineReader, conn: &Arc<Connection>, registry: &Registry) -> bool {
    match next_frame(reader, conn).await {
        Some(Ok(frame)) => match frame.body {
            ClientMessage::Hello { name } => {
                conn.set_name(name.unwrap_or_else(|| conn.addr.to_string()));
            }
            _ => {
                let _ = conn
                    .send(&ServerMessage::Error {
                        reason: "expected HELLO".to_string(),
                    })
                    .await;
                return false;
            }
        },
        Some(Err(e)) => {
            let _ = conn
                .send(&ServerMessage::Error {
                    reason: e.to_string(),
                })
                .await;
            return false;
        }
        None => return false,
    }

    let _ = conn
        .send(&ServerMessage::Welcome {
            server_version: PROTOCOL_VERSION.to_string(),
            connection_id: conn.id,
        })
        .await;

    match next_frame(reader, conn).await {
        Some(Ok(Frame {
            body: ClientMessage::Ready {},
            ..
        })) => {}
        Some(_) => {
            let _ = conn
                .send(&ServerMessage::Error {
                    reason: "expected READY".to_string(),
                })
                .await;
            return false;
        }
        None => return false,
    }

    // WAITING goes out before the enqueue so it cannot race behind MATCHED.
    let _ = conn
        .send(&ServerMessage::Waiting {
            info: "waiting for opponent".to_string(),
        })
        .await;
    registry.enqueue_waiting(conn.clone());
    info!("client {} ({}) queued for matchmaking", conn.addr, conn.name());
    true
}

/// Post-handshake message pump. Exhaustive over the message set: game
/// traffic is routed to the current room, keep-alives answered inline,
/// everything out of place gets an ERROR without closing the connection.
async fn dispatch_loop(reader: &mut LineReader, conn: &Arc<Connection>, registry: &Registry) {
    while conn.is_alive() {
        let frame = match next_frame(reader, conn).await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!("bad frame from {}: {}", conn.addr, e);
                // Carry the decode error so an unknown type tag reads
                // differently from broken JSON.
                let _ = conn
                    .send(&ServerMessage::Error {
                        reason: e.to_string(),
                    })
                    .await;
                continue;
            }
            None => break,
        };

        match frame.body {
            ClientMessage::Ping {} => {
                conn.touch_heartbeat();
                let _ = conn.send(&ServerMessage::Pong {}).await;
            }
            ClientMessage::Move { col } => match current_room(registry, conn).await {
                Some(room) => room.handle_move(registry, conn, col, frame.seq).await,
                None => not_in_room(conn).await,
            },
            ClientMessage::Chat { message } => match current_room(registry, conn).await {
                Some(room) => room.handle_chat(conn, message).await,
                None => not_in_room(conn).await,
            },
            ClientMessage::Resync { .. } => match current_room(registry, conn).await {
                Some(room) => room.handle_resync(conn).await,
                None => not_in_room(conn).await,
            },
            ClientMessage::Leave {} => {
                let _ = conn
                    .send(&ServerMessage::Bye {
                        info: "left".to_string(),
                    })
                    .await;
                break;
            }
            ClientMessage::Hello { .. } | ClientMessage::Ready {} => {
                let _ = conn
                    .send(&ServerMessage::Error {
                        reason: "unexpected message type".to_string(),
                    })
                    .await;
            }
        }
    }
}

/// Read one frame, or None when the peer closed, the socket errored, or the
/// connection was killed by another task (failed send, heartbeat sweep).
async fn next_frame(
    reader: &mut LineReader,
    conn: &Arc<Connection>,
) -> Option<Result<Frame<ClientMessage>, ProtocolError>> {
    tokio::select! {
        _ = conn.wait_killed() => None,
        line = reader.next_line() => match line {
            Ok(Some(line)) => {
                debug!("recv from {} <- {}", conn.addr, line);
                Some(protocol::decode(&line))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("read error from {}: {}", conn.addr, e);
                None
            }
        },
    }
}

async fn not_in_room(conn: &Arc<Connection>) {
    let _ = conn
        .send(&ServerMessage::Error {
            reason: "not in a room".to_string(),
        })
        .await;
}

async fn current_room(registry: &Registry, conn: &Arc<Connection>) -> Option<Arc<Room>> {
    let membership = conn.membership().await?;
    registry.room(membership.room_id).await
}

/// Single exit path for a worker: close the socket, leave the active set,
/// and report the disconnect to the room if the connection was in one.
async fn cleanup(registry: &Registry, conn: &Arc<Connection>) {
    conn.close().await;
    registry.remove_connection(conn.id).await;
    if let Some(membership) = conn.membership().await {
        if let Some(room) = registry.room(membership.room_id).await {
            room.handle_disconnect(registry, membership.slot, "opponent disconnected")
                .await;
        }
    }
    info!("connection {} ({}) closed", conn.addr, conn.id);
}
