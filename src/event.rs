//! Events pushed to the UI.
//!
//! Events arrive on the bounded channel returned by
//! [`SessionController::new`](crate::controller::SessionController::new) in
//! the order the session state changed.

use std::time::Duration;

use crate::board::Side;
use crate::error_codes::ErrorCode;
use crate::protocol::{PlayerId, TableId};
use crate::referee::{GameStatus, MoveRecord};
use crate::table::ConnectionState;

/// What happened to a move queued for the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Written to the transport.
    Sent,
    /// The server echoed it back.
    Acknowledged,
    /// Re-sent after a resync found the table unchanged.
    Replayed,
    /// Dropped because the table moved on while we were away.
    Discarded,
}

/// A chat line received at the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: PlayerId,
    pub text: String,
    /// Arrival order within the session, starting at 1.
    pub order: u64,
}

/// Events emitted by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The connection state changed.
    ConnectionChanged { state: ConnectionState },
    /// The server accepted our credentials.
    LoginSucceeded { player_id: PlayerId },
    /// The server refused our credentials.
    LoginFailed {
        error_code: ErrorCode,
        reason: String,
        /// The identity is already logged in elsewhere.
        auth_conflict: bool,
    },
    /// We are now at a table, as a player or an observer.
    TableJoined {
        table_id: TableId,
        seat: Option<Side>,
    },
    TableLeft { table_id: TableId },
    /// A move was applied to the board.
    MoveApplied {
        record: MoveRecord,
        /// Played by the other side of the connection rather than locally.
        remote: bool,
    },
    StatusChanged { status: GameStatus },
    /// A seat ran out of time.
    ClockExpired { side: Side },
    /// Authoritative clock values were applied.
    ClocksUpdated { red: Duration, black: Duration },
    /// Seat occupancy or the observer list changed.
    SeatsChanged,
    /// New chat lines are waiting in
    /// [`drain_new_messages`](crate::controller::SessionController::drain_new_messages).
    ChatReceived { sender: PlayerId },
    /// Delivery progress of one of our moves.
    MoveDelivery {
        number: u32,
        outcome: DeliveryOutcome,
    },
    DrawOffered { by: Side },
    /// Local table state is no longer trusted; a snapshot was requested.
    ResyncRequested { reason: String },
    /// A snapshot replaced the local table state.
    ResyncCompleted { table_id: TableId, move_count: u32 },
    /// The server reported an error.
    ServerError {
        message: String,
        error_code: Option<ErrorCode>,
    },
    /// Reconnection gave up. The session is offline until `connect()`.
    ConnectivityLost { reason: String },
    /// The session loop ended. Always the last event.
    Disconnected { reason: Option<String> },
}
