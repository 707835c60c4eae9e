//! Built-in transports.
//!
//! | Feature                | Transport              | Connector              |
//! |------------------------|------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] | [`WebSocketConnector`] |
//!
//! ```rust,ignore
//! use xiangqi_session::{SessionConfig, SessionController, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new("wss://xiangqi.example.org/table");
//! let (session, events) = SessionController::new(connector, SessionConfig::new("1.0"));
//! session.connect();
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
