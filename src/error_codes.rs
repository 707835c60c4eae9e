//! Error codes carried by `login_rejected` and `error` server frames.
//!
//! Codes serialize as `SCREAMING_SNAKE_CASE` strings (e.g. `"TABLE_NOT_FOUND"`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes returned by the game server.
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation
/// and [`is_auth_conflict()`](ErrorCode::is_auth_conflict) to recognise a
/// rejected login caused by the identity already being in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication errors
    WrongPassword,
    UnknownPlayer,
    AlreadyLoggedIn,
    LoginRequired,
    ClientVersionUnsupported,

    // Table errors
    TableNotFound,
    TableFull,
    SeatTaken,
    NotSeated,
    NotAtTable,
    GameNotInProgress,

    // Move errors
    IllegalMove,
    NotYourTurn,

    // Chat and rate limiting
    MessageTooLarge,
    RateLimitExceeded,

    // Server errors
    InternalError,
    ServiceUnavailable,
}

impl ErrorCode {
    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::WrongPassword => "The password does not match this player ID.",
            Self::UnknownPlayer => "No account exists with this player ID.",
            Self::AlreadyLoggedIn => {
                "This player ID is already logged in from another session."
            }
            Self::LoginRequired => "Log in before performing this action.",
            Self::ClientVersionUnsupported => {
                "This client version is no longer supported by the server. Please upgrade."
            }

            Self::TableNotFound => {
                "The requested table could not be found. It may have been closed."
            }
            Self::TableFull => "Both seats at this table are taken.",
            Self::SeatTaken => "That seat is already occupied by another player.",
            Self::NotSeated => "Only seated players can perform this action.",
            Self::NotAtTable => "Join a table before performing this action.",
            Self::GameNotInProgress => "The game at this table is not in progress.",

            Self::IllegalMove => "The server rejected the move as illegal.",
            Self::NotYourTurn => "It is not your turn to move.",

            Self::MessageTooLarge => {
                "The message size exceeds the maximum allowed limit. Please send a smaller message."
            }
            Self::RateLimitExceeded => {
                "Too many requests in a short time. Please slow down and try again later."
            }

            Self::InternalError => {
                "An internal server error occurred. Please try again later."
            }
            Self::ServiceUnavailable => {
                "The service is temporarily unavailable. Please try again in a few moments."
            }
        }
    }

    /// Whether this code means the identity is already authenticated elsewhere.
    pub fn is_auth_conflict(&self) -> bool {
        matches!(self, Self::AlreadyLoggedIn)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
