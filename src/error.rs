//! Error types for the Xiangqi session layer.

use thiserror::Error;

use crate::board::Side;
use crate::protocol::PlayerId;

/// Reasons the referee refuses a move.
///
/// A rejected move never reaches the board and is never transmitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    /// A coordinate lies outside the 9x10 board.
    #[error("square ({file}, {rank}) is off the board")]
    OffBoard { file: u8, rank: u8 },

    /// The game has already finished.
    #[error("the game is over")]
    GameOver,

    /// There is no piece on the origin square.
    #[error("no piece on the origin square")]
    EmptySquare,

    /// The piece on the origin square belongs to the side not on move.
    #[error("it is {to_move}'s turn")]
    NotYourTurn { to_move: Side },

    /// The piece cannot reach the destination under its movement rules.
    #[error("the piece cannot move that way")]
    IllegalPieceMove,

    /// The destination holds a piece of the mover's own side.
    #[error("cannot capture your own piece")]
    CaptureOwnPiece,

    /// The move would leave the mover's general attacked or facing the other general.
    #[error("the move leaves the general in check")]
    LeavesGeneralInCheck,

    /// The move would repeat a position through an unbroken series of checks.
    #[error("perpetual check is not allowed")]
    PerpetualCheck,

    /// The move counter cannot go any higher.
    #[error("move limit reached")]
    MoveLimit,
}

/// Clock operations that cannot be carried out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// Only the side to move may have a running clock.
    #[error("{side} is not on move")]
    NotOnMove { side: Side },

    /// An expired clock never runs again.
    #[error("{side}'s clock has expired")]
    Expired { side: Side },
}

/// Seat assignment failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeatError {
    /// The seat is held by somebody else.
    #[error("{side} seat is occupied by {occupant}")]
    Occupied { side: Side, occupant: PlayerId },
}

/// Errors that can occur when using the session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation needs a live connection to the server.
    #[error("not connected to server")]
    NotConnected,

    /// The operation needs a confirmed login.
    #[error("not logged in")]
    NotAuthenticated,

    /// The operation needs an active table.
    #[error("not at a table")]
    NoActiveTable,

    /// The local player does not hold the seat of the side to move.
    #[error("not seated as {side}")]
    NotSeated { side: Side },

    /// Too many moves are waiting for the connection to come back.
    #[error("outgoing move queue is full")]
    OutboxFull,

    /// The identity is already authenticated, here or elsewhere.
    #[error("identity {player_id} is already logged in")]
    AuthConflict { player_id: PlayerId },

    /// The server could not be reached after all retries, or stopped
    /// answering a resync.
    #[error("connectivity failure: {0}")]
    ConnectivityFailure(String),

    /// A board description could not be parsed.
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    /// The engine strength is outside the supported range.
    #[error("engine strength {level} is outside {min}..={max}")]
    InvalidStrength { level: u8, min: u8, max: u8 },

    /// The referee rejected a move.
    #[error("illegal move: {0}")]
    Rule(#[from] RuleViolation),

    /// The server did not answer a connection attempt in time.
    #[error("connection attempt timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
