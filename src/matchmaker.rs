use std::sync::Arc;

use tracing::{debug, info};

use crate::board::Slot;
use crate::connection::Connection;
use crate::protocol::ServerMessage;
use crate::registry::{Registry, WaitingReceiver};
use crate::room::Room;

/// FIFO pairing loop. Blocks on the waiting queue, discards dead candidates
/// (including a first pick that died while its partner was awaited), and
/// never re-queues anything.
pub async fn run(registry: Registry, mut waiting: WaitingReceiver) {
    let mut held: Option<Arc<Connection>> = None;
    while let Some(candidate) = waiting.recv().await {
        if !candidate.is_alive() {
            debug!("matchmaker: skipping dead candidate {}", candidate.id);
            continue;
        }
        held = match held.take() {
            None => Some(candidate),
            Some(first) if !first.is_alive() => {
                debug!("matchmaker: skipping dead candidate {}", first.id);
                Some(candidate)
            }
            Some(first) => {
                pair(&registry, first, candidate).await;
                None
            }
        };
    }
}

/// Create the room, register it before announcing it, then tell each member
/// its slot and opponent and broadcast the opening (empty) board.
async fn pair(registry: &Registry, first: Arc<Connection>, second: Arc<Connection>) {
    let room = Room::new(first.clone(), second.clone());
    room.assign_members().await;
    registry.insert_room(room.clone()).await;

    info!(
        "matched {} and {} into room {}",
        first.name(),
        second.name(),
        room.id
    );

    let _ = first
        .send(&ServerMessage::Matched {
            room_id: room.id,
            opponent: second.name(),
            you: Slot::One,
            first_turn: true,
        })
        .await;
    let _ = second
        .send(&ServerMessage::Matched {
            room_id: room.id,
            opponent: first.name(),
            you: Slot::Two,
            first_turn: false,
        })
        .await;

    room.send_update().await;
}
