//! # Xiangqi Session
//!
//! Client-side session layer for two-player Xiangqi (Chinese chess), played
//! on one device or at a networked table.
//!
//! ## Features
//!
//! - **Referee**: complete move legality, check, checkmate, stalemate and
//!   draw detection; the single authority on game status
//! - **Move engine**: alpha-beta search at six strength levels, cancellable
//! - **Clocks and seats**: per-side countdown clocks, seat and observer tracking
//! - **Resynchronizing protocol client**: sequenced table frames, bounded
//!   reconnection, snapshot resync with queued-move replay
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any
//!   backend; the default `transport-websocket` feature provides
//!   `WebSocketConnector`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use xiangqi_session::{MemorySettings, SessionConfig, SessionController, SessionFacade};
//!
//! let connector = WebSocketConnector::new("wss://xiangqi.example.org/table");
//! let (controller, mut events) = SessionController::new(connector, SessionConfig::new("1.0"));
//! let facade = SessionFacade::new(controller, MemorySettings::new());
//!
//! facade.new_local_game();
//! facade.submit_move(Position::new(7, 2)?, Position::new(4, 2)?)?;
//! facade.play_engine_move().await?;
//! ```

pub mod board;
pub mod clock;
pub mod controller;
pub mod engine;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod facade;
pub mod protocol;
pub mod referee;
pub mod rules;
pub mod seats;
pub mod settings;
pub mod table;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use board::{Board, Piece, PieceKind, Position, Side};
pub use clock::{ClockPhase, ClockTracker, TimeControl};
pub use controller::{SessionConfig, SessionController};
pub use engine::{MoveEngine, SearchOutcome};
pub use error::{ClockError, Result, RuleViolation, SeatError, SessionError};
pub use error_codes::ErrorCode;
pub use event::{ChatMessage, DeliveryOutcome, SessionEvent};
pub use facade::SessionFacade;
pub use protocol::{ClientFrame, ClientMessage, ServerFrame, ServerMessage};
pub use referee::{GameStatus, MoveAccepted, MoveRecord, Referee};
pub use seats::{SeatTracker, TableType};
pub use settings::{MemorySettings, SavedAccount, SettingsStore};
pub use table::{ConnectionState, Credentials, TableView};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
