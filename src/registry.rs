use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::connection::Connection;
use crate::room::Room;

/// Receiving end of the waiting queue, owned by the matchmaker loop.
pub type WaitingReceiver = mpsc::UnboundedReceiver<Arc<Connection>>;

/// The shared server state: active-connection set and room table behind one
/// lock, plus the FIFO waiting queue (a channel, which brings its own
/// synchronization). Cloned into the acceptor, matchmaker, and heartbeat
/// tasks at startup; no globals.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Mutex<RegistryInner>>,
    waiting_tx: mpsc::UnboundedSender<Arc<Connection>>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<Uuid, Arc<Connection>>,
    rooms: HashMap<Uuid, Arc<Room>>,
}

impl Registry {
    pub fn new() -> (Self, WaitingReceiver) {
        let (waiting_tx, waiting_rx) = mpsc::unbounded_channel();
        let registry = Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            waiting_tx,
        };
        (registry, waiting_rx)
    }

    pub async fn add_connection(&self, conn: Arc<Connection>) {
        self.inner.lock().await.connections.insert(conn.id, conn);
    }

    pub async fn remove_connection(&self, id: Uuid) {
        self.inner.lock().await.connections.remove(&id);
    }

    /// Snapshot for the heartbeat sweep; the lock is not held while the
    /// monitor works through the list.
    pub async fn connections(&self) -> Vec<Arc<Connection>> {
        self.inner.lock().await.connections.values().cloned().collect()
    }

    /// Append a handshake-complete connection to the matchmaking queue.
    /// Dead entries are skipped lazily by the matchmaker, never removed here.
    pub fn enqueue_waiting(&self, conn: Arc<Connection>) {
        let _ = self.waiting_tx.send(conn);
    }

    pub async fn insert_room(&self, room: Arc<Room>) {
        self.inner.lock().await.rooms.insert(room.id, room);
    }

    pub async fn remove_room(&self, id: Uuid) {
        self.inner.lock().await.rooms.remove(&id);
    }

    pub async fn room(&self, id: Uuid) -> Option<Arc<Room>> {
        self.inner.lock().await.rooms.get(&id).cloned()
    }

    /// (open connections, live rooms) for periodic logging.
    pub async fn stats(&self) -> (usize, usize) {
        let inner = self.inner.lock().await;
        (inner.connections.len(), inner.rooms.len())
    }
}
