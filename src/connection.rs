use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::board::Slot;
use crate::protocol::{self, ProtocolError, ServerMessage};

/// Why a send did not go out. Transport failures are terminal for the
/// connection; nothing here is retried.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Encode(#[from] ProtocolError),
    #[error("socket write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The room/slot assignment of a paired connection. Written only by the
/// owning room: set at pairing, cleared exactly once at session end.
#[derive(Debug, Clone, Copy)]
pub struct Membership {
    pub room_id: Uuid,
    pub slot: Slot,
}

/// One accepted socket. The per-connection worker owns the read half and the
/// lifecycle; the write half sits behind a send lock so room broadcasts and
/// direct replies never interleave inside a frame. Liveness and the
/// last-heartbeat clock are touched by other tasks (heartbeat monitor, rooms)
/// through atomics.
pub struct Connection {
    pub id: Uuid,
    pub addr: SocketAddr,
    name: OnceLock<String>,
    writer: Mutex<OwnedWriteHalf>,
    membership: Mutex<Option<Membership>>,
    alive: AtomicBool,
    created: Instant,
    /// Milliseconds since `created`, updated on every inbound PING.
    last_heartbeat_ms: AtomicU64,
    seq: AtomicU64,
    killed: Notify,
}

impl Connection {
    pub fn new(addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id: Uuid::new_v4(),
            addr,
            name: OnceLock::new(),
            writer: Mutex::new(writer),
            membership: Mutex::new(None),
            alive: AtomicBool::new(true),
            created: Instant::now(),
            last_heartbeat_ms: AtomicU64::new(0),
            seq: AtomicU64::new(0),
            killed: Notify::new(),
        }
    }

    /// Record the display name from HELLO. First write wins.
    pub fn set_name(&self, name: String) {
        let _ = self.name.set(name);
    }

    /// Display name, falling back to the peer address before HELLO.
    pub fn name(&self) -> String {
        self.name
            .get()
            .cloned()
            .unwrap_or_else(|| self.addr.to_string())
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Flip the liveness flag off and wake the reader task. Returns whether
    /// this call was the one that killed the connection.
    pub fn mark_dead(&self) -> bool {
        let was_alive = self.alive.swap(false, Ordering::SeqCst);
        self.killed.notify_one();
        was_alive
    }

    /// Completes once the connection has been marked dead by any task.
    pub async fn wait_killed(&self) {
        self.killed.notified().await;
    }

    pub fn touch_heartbeat(&self) {
        let elapsed = self.created.elapsed().as_millis() as u64;
        self.last_heartbeat_ms.store(elapsed, Ordering::SeqCst);
    }

    /// Time since the last observed keep-alive (or since accept).
    pub fn heartbeat_age(&self) -> Duration {
        let now = self.created.elapsed().as_millis() as u64;
        let last = self.last_heartbeat_ms.load(Ordering::SeqCst);
        Duration::from_millis(now.saturating_sub(last))
    }

    pub async fn membership(&self) -> Option<Membership> {
        *self.membership.lock().await
    }

    pub(crate) async fn set_membership(&self, membership: Membership) {
        *self.membership.lock().await = Some(membership);
    }

    pub(crate) async fn clear_membership(&self) {
        *self.membership.lock().await = None;
    }

    /// Wrap `msg` in the envelope with the next outgoing sequence number and
    /// write the whole frame under the send lock. A socket error marks the
    /// connection dead; the caller must treat it as gone.
    pub async fn send(&self, msg: &ServerMessage) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Closed);
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let line = protocol::encode(msg, Some(seq))?;
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            drop(writer);
            warn!("send error to {}: {}", self.addr, e);
            self.mark_dead();
            return Err(e.into());
        }
        drop(writer);
        debug!("sent to {} -> {}", self.addr, line.trim_end());
        Ok(())
    }

    /// Idempotent shutdown: marks the connection dead and closes the write
    /// half. Safe to call from any task, any number of times.
    pub async fn close(&self) {
        self.mark_dead();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("name", &self.name.get())
            .field("alive", &self.is_alive())
            .finish()
    }
}
