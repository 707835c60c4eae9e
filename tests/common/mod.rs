#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the integration tests.
//!
//! Provides a channel-based [`MockTransport`] with its server half
//! [`MockServer`], a scripted [`MockConnector`], and helpers for building
//! server frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use xiangqi_session::board::{Board, Position, Side};
use xiangqi_session::protocol::{
    ClientFrame, ClientMessage, ClockInfo, ServerFrame, ServerMessage, TableSnapshot, WireMove,
};
use xiangqi_session::referee::GameStatus;
use xiangqi_session::{Connector, SessionError, SessionEvent, Transport};

/// How long a test waits for anything before failing.
pub const WAIT: Duration = Duration::from_secs(2);

pub const TABLE: &str = "t1";

// ── Tracing ─────────────────────────────────────────────────────────

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── MockTransport ───────────────────────────────────────────────────

type Incoming = Option<Result<String, SessionError>>;

/// Client half of an in-memory link.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    outgoing: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

/// Server half of an in-memory link, driven by the test.
pub struct MockServer {
    to_client: mpsc::UnboundedSender<Incoming>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn pair() -> (Self, MockServer) {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming,
            outgoing,
            closed: Arc::clone(&closed),
        };
        let server = MockServer {
            to_client,
            from_client,
            closed,
        };
        (transport, server)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: String) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::TransportClosed);
        }
        self.outgoing
            .send(frame)
            .map_err(|_| SessionError::TransportClosed)
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        // A dropped server half reads as a clean close.
        self.incoming.recv().await.flatten()
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl MockServer {
    pub fn push(&self, frame: &ServerFrame) {
        let json = serde_json::to_string(frame).expect("server frame serialization");
        self.push_raw(json);
    }

    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.to_client.send(Some(Ok(text.into())));
    }

    /// Close the link from the server side.
    pub fn hang_up(&self) {
        let _ = self.to_client.send(None);
    }

    /// Fail the link with a receive error.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .to_client
            .send(Some(Err(SessionError::TransportReceive(reason.into()))));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Next frame the client wrote.
    pub async fn next_frame(&mut self) -> ClientFrame {
        let text = tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client half dropped");
        serde_json::from_str(&text).expect("client frame decodes")
    }

    /// Skip frames until one matches `pred`.
    pub async fn expect_frame(&mut self, pred: impl Fn(&ClientMessage) -> bool) -> ClientFrame {
        loop {
            let frame = self.next_frame().await;
            if pred(&frame.message) {
                return frame;
            }
        }
    }

    /// Frames already written, without waiting.
    pub fn written(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            frames.push(serde_json::from_str(&text).expect("client frame decodes"));
        }
        frames
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Hands out scripted connection results in order; refuses once empty.
#[derive(Clone, Default)]
pub struct MockConnector {
    plan: Arc<StdMutex<VecDeque<Result<MockTransport, String>>>>,
    attempts: Arc<StdMutex<u32>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful connection and return its server half.
    pub fn accept(&self) -> MockServer {
        let (transport, server) = MockTransport::pair();
        self.plan.lock().unwrap().push_back(Ok(transport));
        server
    }

    /// Queue a failed connection attempt.
    pub fn refuse(&self, reason: &str) {
        self.plan.lock().unwrap().push_back(Err(reason.into()));
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, SessionError> {
        *self.attempts.lock().unwrap() += 1;
        let next = self.plan.lock().unwrap().pop_front();
        match next {
            Some(Ok(transport)) => Ok(Box::new(transport)),
            Some(Err(reason)) => Err(SessionError::TransportSend(reason)),
            None => Err(SessionError::TransportClosed),
        }
    }
}

/// Never answers a connection attempt.
#[derive(Clone, Copy, Default)]
pub struct StallingConnector;

#[async_trait]
impl Connector for StallingConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, SessionError> {
        std::future::pending().await
    }
}

// ── Events ──────────────────────────────────────────────────────────

pub async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip events until one matches `pred`.
pub async fn wait_for(
    events: &mut mpsc::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Collect events up to and including `Disconnected`.
pub async fn until_disconnected(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = matches!(event, SessionEvent::Disconnected { .. });
        seen.push(event);
        if done {
            return seen;
        }
    }
}

// ── Frame helpers ───────────────────────────────────────────────────

pub fn pos(file: u8, rank: u8) -> Position {
    Position::new(file, rank).unwrap()
}

pub fn login_accepted(player_id: &str) -> ServerFrame {
    ServerFrame::session(ServerMessage::LoginAccepted {
        player_id: player_id.into(),
        rating: Some(1500),
    })
}

/// Snapshot of [`TABLE`] with the clocks at ten minutes each.
pub fn snapshot(
    seq: u64,
    board: Board,
    move_count: u32,
    red: Option<&str>,
    black: Option<&str>,
) -> ServerFrame {
    snapshot_of(TABLE, seq, board, move_count, red, black)
}

/// Snapshot of `table` with the clocks at ten minutes each.
pub fn snapshot_of(
    table: &str,
    seq: u64,
    board: Board,
    move_count: u32,
    red: Option<&str>,
    black: Option<&str>,
) -> ServerFrame {
    ServerFrame::table(
        table,
        seq,
        ServerMessage::TableSnapshot(Box::new(TableSnapshot {
            table_id: table.into(),
            board,
            move_count,
            status: GameStatus::InProgress,
            red: red.map(Into::into),
            black: black.map(Into::into),
            observers: Vec::new(),
            clocks: ClockInfo::new(Duration::from_secs(600), Duration::from_secs(600)),
            last_move: None,
        })),
    )
}

pub fn move_frame(seq: u64, from: Position, to: Position, side: Side, number: u32) -> ServerFrame {
    ServerFrame::table(
        TABLE,
        seq,
        ServerMessage::Move {
            played: WireMove {
                from,
                to,
                side,
                number,
            },
            clocks: None,
        },
    )
}

pub fn chat_frame(seq: u64, sender: &str, text: &str) -> ServerFrame {
    ServerFrame::table(
        TABLE,
        seq,
        ServerMessage::Chat {
            sender: sender.into(),
            text: text.into(),
        },
    )
}

pub fn is_login(message: &ClientMessage) -> bool {
    matches!(message, ClientMessage::Login { .. })
}

pub fn is_join(message: &ClientMessage) -> bool {
    matches!(message, ClientMessage::JoinTable { .. })
}
