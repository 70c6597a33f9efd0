use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::board::{Board, ColumnFull, Slot, COLS};
use crate::connection::{Connection, Membership};
use crate::protocol::ServerMessage;
use crate::registry::Registry;

/// Session phases. Terminal `Ended` is reached exactly once, via win, draw,
/// or a member disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingFirstMove,
    InProgress,
    Ended,
}

struct RoomState {
    board: Board,
    turn: Slot,
    phase: Phase,
}

/// One two-player game session. The state lock totally orders the members'
/// effects on the board; two rooms never share a lock. The room is the sole
/// writer of its members' room/slot fields.
pub struct Room {
    pub id: Uuid,
    created_at: Instant,
    players: [Arc<Connection>; 2],
    state: Mutex<RoomState>,
}

impl Room {
    /// `first` was dequeued first: it gets slot 1 and the opening move.
    pub fn new(first: Arc<Connection>, second: Arc<Connection>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            created_at: Instant::now(),
            players: [first, second],
            state: Mutex::new(RoomState {
                board: Board::new(),
                turn: Slot::One,
                phase: Phase::AwaitingFirstMove,
            }),
        })
    }

    pub fn player(&self, slot: Slot) -> &Arc<Connection> {
        match slot {
            Slot::One => &self.players[0],
            Slot::Two => &self.players[1],
        }
    }

    fn slot_of(&self, conn: &Arc<Connection>) -> Option<Slot> {
        if Arc::ptr_eq(&self.players[0], conn) {
            Some(Slot::One)
        } else if Arc::ptr_eq(&self.players[1], conn) {
            Some(Slot::Two)
        } else {
            None
        }
    }

    /// Write the room/slot assignment into both members. Called once by the
    /// matchmaker before the room is announced.
    pub async fn assign_members(&self) {
        for (i, player) in self.players.iter().enumerate() {
            let slot = if i == 0 { Slot::One } else { Slot::Two };
            player
                .set_membership(Membership {
                    room_id: self.id,
                    slot,
                })
                .await;
        }
    }

    /// Send the same message to both members. A failed send marks that
    /// member dead; its worker observes the death and reports the disconnect.
    pub async fn broadcast(&self, msg: &ServerMessage) {
        for player in &self.players {
            let _ = player.send(msg).await;
        }
    }

    /// Broadcast the authoritative board and turn pointer.
    pub async fn send_update(&self) {
        let state = self.state.lock().await;
        self.broadcast_update(&state).await;
    }

    async fn broadcast_update(&self, state: &RoomState) {
        self.broadcast(&ServerMessage::Update {
            board: state.board.clone(),
            next_turn: state.turn,
            room_id: self.id,
        })
        .await;
    }

    /// Validate and apply one MOVE. Rejections (ended game, wrong turn, bad
    /// column, full column) reply INVALID to the mover and change nothing.
    /// An accepted move is ACKed with the inbound sequence number, then win
    /// is checked before draw, then the turn flips and the board goes out.
    pub async fn handle_move(
        &self,
        registry: &Registry,
        conn: &Arc<Connection>,
        col: i64,
        inbound_seq: Option<u64>,
    ) {
        let Some(slot) = self.slot_of(conn) else {
            let _ = conn
                .send(&ServerMessage::Error {
                    reason: "not in this room".to_string(),
                })
                .await;
            return;
        };

        let mut state = self.state.lock().await;
        if state.phase == Phase::Ended {
            let _ = conn
                .send(&ServerMessage::Invalid {
                    reason: "game ended".to_string(),
                })
                .await;
            return;
        }
        if slot != state.turn {
            let _ = conn
                .send(&ServerMessage::Invalid {
                    reason: "not your turn".to_string(),
                })
                .await;
            return;
        }
        let col = match usize::try_from(col) {
            Ok(c) if c < COLS => c,
            _ => {
                let _ = conn
                    .send(&ServerMessage::Invalid {
                        reason: "invalid column".to_string(),
                    })
                    .await;
                return;
            }
        };
        let row = match state.board.drop_piece(col, slot) {
            Ok(row) => row,
            Err(ColumnFull) => {
                let _ = conn
                    .send(&ServerMessage::Invalid {
                        reason: "column full".to_string(),
                    })
                    .await;
                return;
            }
        };

        if state.phase == Phase::AwaitingFirstMove {
            state.phase = Phase::InProgress;
        }
        let _ = conn
            .send(&ServerMessage::Ack {
                ack_seq: inbound_seq,
            })
            .await;
        info!(
            "room {}: player {} placed at {},{}",
            self.id, slot, row, col
        );

        if state.board.is_winning_cell(row, col, slot) {
            self.broadcast_update(&state).await;
            self.broadcast(&ServerMessage::Win { winner: slot }).await;
            info!("room {}: player {} wins", self.id, slot);
            self.finish(registry, &mut state).await;
        } else if state.board.is_full() {
            self.broadcast_update(&state).await;
            self.broadcast(&ServerMessage::Draw {}).await;
            info!("room {}: draw", self.id);
            self.finish(registry, &mut state).await;
        } else {
            state.turn = slot.other();
            self.broadcast_update(&state).await;
        }
    }

    /// A member is gone: tell the survivor once and end the session.
    /// Idempotent and safe to race from several detection paths (failed
    /// send, closed read, heartbeat sweep); an already-ended room is a no-op.
    pub async fn handle_disconnect(&self, registry: &Registry, leaver: Slot, reason: &str) {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Ended {
            return;
        }
        let _ = self
            .player(leaver.other())
            .send(&ServerMessage::Quit {
                reason: reason.to_string(),
            })
            .await;
        info!("room {} ended: slot {} disconnected", self.id, leaver);
        self.finish(registry, &mut state).await;
    }

    /// Full state snapshot, addressed to the requester only. Read-only.
    pub async fn handle_resync(&self, conn: &Arc<Connection>) {
        let state = self.state.lock().await;
        if state.phase == Phase::Ended {
            let _ = conn
                .send(&ServerMessage::Error {
                    reason: "not in a room".to_string(),
                })
                .await;
            return;
        }
        let _ = conn
            .send(&ServerMessage::State {
                board: state.board.clone(),
                next_turn: state.turn,
                room_id: self.id,
            })
            .await;
    }

    /// Relay a chat line to both members, tagged with the sender's name.
    pub async fn handle_chat(&self, conn: &Arc<Connection>, text: String) {
        let state = self.state.lock().await;
        if state.phase == Phase::Ended {
            let _ = conn
                .send(&ServerMessage::Error {
                    reason: "not in a room".to_string(),
                })
                .await;
            return;
        }
        self.broadcast(&ServerMessage::Chat {
            from: conn.name(),
            message: text,
        })
        .await;
    }

    /// Terminal transition: flips the phase, clears both members' room/slot
    /// references, and drops the room from the registry table.
    async fn finish(&self, registry: &Registry, state: &mut RoomState) {
        state.phase = Phase::Ended;
        for player in &self.players {
            player.clear_membership().await;
        }
        registry.remove_room(self.id).await;
        info!(
            "room {} deregistered after {:.1}s",
            self.id,
            self.created_at.elapsed().as_secs_f64()
        );
    }
}
