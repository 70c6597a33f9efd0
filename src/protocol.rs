use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

use crate::board::{Board, Slot};

/// Protocol version carried in every frame.
pub const PROTOCOL_VERSION: &str = "1.1";

/// Codec failures. Malformed peer input is an error value, never a panic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The newline-delimited message envelope. `body` flattens to the wire-level
/// `type` tag plus `payload` object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame<T> {
    pub version: String,
    #[serde(default)]
    pub seq: Option<u64>,
    pub request_id: Uuid,
    pub timestamp: f64,
    #[serde(flatten)]
    pub body: T,
}

/// Client -> Server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "UPPERCASE")]
pub enum ClientMessage {
    /// Handshake opener, carries the display name
    Hello {
        #[serde(default)]
        name: Option<String>,
    },
    /// Handshake completion, asks to be queued for a match
    Ready {},
    /// Keep-alive ping
    Ping {},
    /// Drop a piece into a column of the current game
    Move { col: i64 },
    /// Chat line relayed to the room
    Chat { message: String },
    /// Request a full state snapshot of the current room
    Resync {
        #[serde(default)]
        room_id: Option<Uuid>,
    },
    /// Graceful goodbye
    Leave {},
}

/// Server -> Client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "UPPERCASE")]
pub enum ServerMessage {
    /// Handshake reply to HELLO
    Welcome {
        server_version: String,
        connection_id: Uuid,
    },
    /// Client is queued for matchmaking
    Waiting { info: String },
    /// A session was created; `you` is the assigned slot
    Matched {
        room_id: Uuid,
        opponent: String,
        you: Slot,
        first_turn: bool,
    },
    /// Authoritative board broadcast after every accepted move
    Update {
        board: Board,
        next_turn: Slot,
        room_id: Uuid,
    },
    /// Application-level acknowledgement of an accepted move
    Ack { ack_seq: Option<u64> },
    /// Game-rule violation; the session stays alive
    Invalid { reason: String },
    /// Game over with a winner
    Win { winner: Slot },
    /// Game over with a full board and no winner
    Draw {},
    /// Opponent left or died; the session is over
    Quit { reason: String },
    /// On-demand snapshot reply to RESYNC
    State {
        board: Board,
        next_turn: Slot,
        room_id: Uuid,
    },
    /// Chat line, tagged with the sender's display name
    Chat { from: String, message: String },
    /// Keep-alive reply
    Pong {},
    /// Reply to a graceful LEAVE
    Bye { info: String },
    /// Protocol-level error
    Error { reason: String },
}

fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Wrap a message body in the envelope and serialize it to one
/// newline-terminated line. serde_json escapes embedded newlines, so the
/// frame can never span lines.
pub fn encode<T: Serialize>(body: &T, seq: Option<u64>) -> Result<String, ProtocolError> {
    let frame = Frame {
        version: PROTOCOL_VERSION.to_string(),
        seq,
        request_id: Uuid::new_v4(),
        timestamp: epoch_seconds(),
        body,
    };
    let mut line = serde_json::to_string(&frame)?;
    line.push('\n');
    Ok(line)
}

/// Parse one received line into an envelope.
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<Frame<T>, ProtocolError> {
    serde_json::from_str(line.trim()).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_one_line_with_envelope_fields() {
        let line = encode(&ServerMessage::Pong {}, Some(7)).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["version"], PROTOCOL_VERSION);
        assert_eq!(value["seq"], 7);
        assert_eq!(value["type"], "PONG");
        assert!(value["payload"].is_object());
        assert!(value["request_id"].is_string());
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn decodes_client_frame() {
        let line = format!(
            r#"{{"version":"1.1","seq":3,"request_id":"{}","type":"MOVE","timestamp":1.5,"payload":{{"col":4}}}}"#,
            Uuid::new_v4()
        );
        let frame: Frame<ClientMessage> = decode(&line).unwrap();
        assert_eq!(frame.seq, Some(3));
        assert!(matches!(frame.body, ClientMessage::Move { col: 4 }));
    }

    #[test]
    fn null_seq_is_accepted() {
        let line = format!(
            r#"{{"version":"1.1","seq":null,"request_id":"{}","type":"PING","timestamp":0.0,"payload":{{}}}}"#,
            Uuid::new_v4()
        );
        let frame: Frame<ClientMessage> = decode(&line).unwrap();
        assert_eq!(frame.seq, None);
        assert!(matches!(frame.body, ClientMessage::Ping {}));
    }

    #[test]
    fn negative_column_still_decodes() {
        // Range validation is the session's job, not the codec's.
        let line = format!(
            r#"{{"version":"1.1","seq":1,"request_id":"{}","type":"MOVE","timestamp":0.0,"payload":{{"col":-2}}}}"#,
            Uuid::new_v4()
        );
        let frame: Frame<ClientMessage> = decode(&line).unwrap();
        assert!(matches!(frame.body, ClientMessage::Move { col: -2 }));
    }

    #[test]
    fn malformed_input_is_an_error_value() {
        assert!(matches!(
            decode::<ClientMessage>("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode::<ClientMessage>(""),
            Err(ProtocolError::Malformed(_))
        ));
        let unknown = format!(
            r#"{{"version":"1.1","seq":1,"request_id":"{}","type":"BOGUS","timestamp":0.0,"payload":{{}}}}"#,
            Uuid::new_v4()
        );
        assert!(matches!(
            decode::<ClientMessage>(&unknown),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
