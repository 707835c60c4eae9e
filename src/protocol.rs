//! Wire types for the table protocol.
//!
//! Every frame is a JSON text message. Frames carry the table they concern
//! and a per-table sequence number; the payload is an adjacently tagged
//! message (`{"op": "...", "data": {...}}`):
//!
//! ```json
//! {"table_id":"t42","seq":7,"message":{"op":"move","data":{"played":{"from":[1,2],"to":[4,2],"side":"red","number":1}}}}
//! ```
//!
//! Boards travel as Xiangqi FEN strings, positions as `[file, rank]` pairs
//! and clock readings as remaining milliseconds per seat.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::board::{Board, Position, Side};
use crate::error::Result;
use crate::error_codes::ErrorCode;
use crate::referee::{GameStatus, MoveRecord};

// ── Type aliases ────────────────────────────────────────────────────

/// Identity of a player as known to the server.
pub type PlayerId = String;

/// Identifier of a table on the server.
pub type TableId = String;

// ── Payloads ────────────────────────────────────────────────────────

/// A move as exchanged with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMove {
    pub from: Position,
    pub to: Position,
    pub side: Side,
    /// 1-based move number at the table.
    pub number: u32,
}

impl From<&MoveRecord> for WireMove {
    fn from(record: &MoveRecord) -> Self {
        Self {
            from: record.from,
            to: record.to,
            side: record.side,
            number: record.number,
        }
    }
}

/// Remaining time per seat, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClockInfo {
    pub red_ms: u64,
    pub black_ms: u64,
}

impl ClockInfo {
    pub fn new(red: Duration, black: Duration) -> Self {
        Self {
            red_ms: u64::try_from(red.as_millis()).unwrap_or(u64::MAX),
            black_ms: u64::try_from(black.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn remaining(&self, side: Side) -> Duration {
        Duration::from_millis(match side {
            Side::Red => self.red_ms,
            Side::Black => self.black_ms,
        })
    }
}

/// Full authoritative state of a table.
/// Boxed in `ServerMessage` to reduce enum size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub table_id: TableId,
    pub board: Board,
    pub move_count: u32,
    pub status: GameStatus,
    pub red: Option<PlayerId>,
    pub black: Option<PlayerId>,
    #[serde(default)]
    pub observers: Vec<PlayerId>,
    pub clocks: ClockInfo,
    /// The move that produced `board`, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_move: Option<WireMove>,
}

/// Incremental change to a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableDelta {
    /// A player sat down.
    SeatTaken { side: Side, player_id: PlayerId },
    /// A seat was emptied.
    SeatVacated { side: Side },
    ObserverJoined { player_id: PlayerId },
    ObserverLeft { player_id: PlayerId },
    /// Both seats are filled and the clocks start.
    GameStarted { clocks: ClockInfo },
    /// The server declared a result (resignation, timeout, agreement...).
    GameEnded {
        status: GameStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Periodic authoritative clock reading.
    ClockSync { clocks: ClockInfo },
    /// The seat on `by` proposes a draw.
    DrawOffered { by: Side },
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate. Sent after every (re)connect when credentials are known.
    Login {
        player_id: PlayerId,
        secret: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
    },
    Logout,
    /// Join a table, or ask the server to pick one when `table_id` is absent.
    /// Always answered with a full `table_snapshot`.
    JoinTable {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        table_id: Option<TableId>,
        #[serde(default)]
        as_observer: bool,
    },
    LeaveTable,
    Move(WireMove),
    Chat { text: String },
    Resign,
    OfferDraw,
    /// Heartbeat.
    Ping,
}

/// Message types sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    LoginAccepted {
        player_id: PlayerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rating: Option<u32>,
    },
    LoginRejected {
        error_code: ErrorCode,
        reason: String,
    },
    /// Full table state (boxed to reduce enum size).
    TableSnapshot(Box<TableSnapshot>),
    /// A move was played at the table, including echoes of our own moves.
    Move {
        played: WireMove,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clocks: Option<ClockInfo>,
    },
    TableDelta(TableDelta),
    Chat { sender: PlayerId, text: String },
    /// The server is closing the connection and will not take it back.
    DisconnectNotice { reason: String },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    Pong,
}

// ── Frames ──────────────────────────────────────────────────────────

/// Envelope for everything the client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<TableId>,
    /// Monotonic per-connection counter of client frames.
    pub seq: u64,
    pub message: ClientMessage,
}

/// Envelope for everything the server sends.
///
/// `seq` is monotonic per table. Frames without a `table_id` are
/// session-level and are not sequenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<TableId>,
    #[serde(default)]
    pub seq: u64,
    pub message: ServerMessage,
}

impl ClientFrame {
    /// The JSON text sent over the transport.
    ///
    /// # Errors
    ///
    /// [`SessionError::Serialization`](crate::SessionError::Serialization)
    /// if the frame cannot be encoded.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerFrame {
    /// Parse one text message from the server.
    ///
    /// # Errors
    ///
    /// [`SessionError::Serialization`](crate::SessionError::Serialization)
    /// if the text is not a well-formed frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// A session-level frame (no table, no sequence).
    pub fn session(message: ServerMessage) -> Self {
        Self {
            table_id: None,
            seq: 0,
            message,
        }
    }

    /// A frame sequenced for `table_id`.
    pub fn table(table_id: impl Into<TableId>, seq: u64, message: ServerMessage) -> Self {
        Self {
            table_id: Some(table_id.into()),
            seq,
            message,
        }
    }
}
