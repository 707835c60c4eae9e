//! Transport abstraction for the table protocol.
//!
//! A [`Transport`] is one live connection that moves JSON text frames in both
//! directions. A [`Connector`] knows how to open a fresh transport; the
//! session calls it for the first connection and for every reconnection
//! attempt.
//!
//! # Implementing a transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use xiangqi_session::error::SessionError;
//! use xiangqi_session::transport::{Connector, Transport};
//!
//! struct Pipe { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for Pipe {
//!     async fn send(&mut self, frame: String) -> Result<(), SessionError> {
//!         unimplemented!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SessionError>> {
//!         unimplemented!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SessionError> {
//!         Ok(())
//!     }
//! }
//!
//! struct PipeConnector;
//!
//! #[async_trait]
//! impl Connector for PipeConnector {
//!     async fn connect(&self) -> Result<Box<dyn Transport>, SessionError> {
//!         Ok(Box::new(Pipe {}))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SessionError;

/// A bidirectional text frame channel to the game server.
///
/// Each [`send`](Transport::send) writes one complete frame and each
/// [`recv`](Transport::recv) yields one.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe: the session polls it
/// inside `tokio::select!`, and a cancelled call must not lose a frame.
/// Channel-backed implementations get this for free.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write one frame.
    ///
    /// # Errors
    ///
    /// [`SessionError::TransportSend`] when the frame could not be written,
    /// [`SessionError::TransportClosed`] after [`close`](Transport::close).
    async fn send(&mut self, frame: String) -> Result<(), SessionError>;

    /// Read the next frame.
    ///
    /// - `Some(Ok(text))`: a frame arrived
    /// - `Some(Err(e))`: the link failed
    /// - `None`: the server closed the connection
    async fn recv(&mut self) -> Option<Result<String, SessionError>>;

    /// Close the connection. Resources are released even if the close
    /// handshake fails.
    ///
    /// # Errors
    ///
    /// Returns the error of a failed close handshake.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens new transports to the game server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection.
    ///
    /// The session bounds each call with its connect timeout.
    ///
    /// # Errors
    ///
    /// Any error means this attempt failed; the session decides whether to retry.
    async fn connect(&self) -> Result<Box<dyn Transport>, SessionError>;
}
