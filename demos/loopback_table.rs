//! # Loopback Table Example
//!
//! Plays a few moves at a networked table against an in-process fake server.
//! The server half keeps its own [`Referee`], echoes our moves and answers
//! each one with a move picked by a [`MoveEngine`].
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_table
//! ```

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use xiangqi_session::protocol::{
    ClientFrame, ClientMessage, ClockInfo, ServerFrame, ServerMessage, TableSnapshot, WireMove,
};
use xiangqi_session::{
    Board, Connector, GameStatus, MemorySettings, MoveEngine, Referee, SearchOutcome,
    SessionConfig, SessionController, SessionError, SessionEvent, SessionFacade, Side,
    TimeControl, Transport,
};

const TABLE: &str = "demo";

// ─────────────────────────────────────────────────────────────────────
// Step 1: A channel-based transport and a connector that hands it out once
// ─────────────────────────────────────────────────────────────────────

struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, frame: String) -> Result<(), SessionError> {
        self.tx
            .send(frame)
            .map_err(|e| SessionError::TransportSend(e.to_string()))
    }

    /// Cancel-safe because `UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

struct LoopbackConnector(Mutex<Option<LoopbackTransport>>);

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, SessionError> {
        let transport = self
            .0
            .lock()
            .map_err(|_| SessionError::TransportClosed)?
            .take()
            .ok_or(SessionError::TransportClosed)?;
        Ok(Box::new(transport))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: The fake server
// ─────────────────────────────────────────────────────────────────────

async fn serve(
    mut from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut referee = Referee::new();
    let engine = MoveEngine::new();
    let time_control = TimeControl::default();
    let mut seq = 0;
    let mut player = None;

    let send = |frame: ServerFrame| -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        to_client.send(serde_json::to_string(&frame)?)?;
        Ok(())
    };

    while let Some(text) = from_client.recv().await {
        let frame: ClientFrame = serde_json::from_str(&text)?;
        tracing::info!("server received: {:?}", frame.message);
        match frame.message {
            ClientMessage::Login { player_id, .. } => {
                player = Some(player_id.clone());
                send(ServerFrame::session(ServerMessage::LoginAccepted {
                    player_id,
                    rating: None,
                }))?;
            }
            ClientMessage::JoinTable { .. } => {
                referee.reset();
                referee.start_game();
                seq += 1;
                send(ServerFrame::table(
                    TABLE,
                    seq,
                    ServerMessage::TableSnapshot(Box::new(TableSnapshot {
                        table_id: TABLE.into(),
                        board: Board::initial(),
                        move_count: 0,
                        status: GameStatus::InProgress,
                        red: player.clone(),
                        black: Some("engine".into()),
                        observers: Vec::new(),
                        clocks: ClockInfo::new(time_control.initial, time_control.initial),
                        last_move: None,
                    })),
                ))?;
            }
            ClientMessage::Move(played) => {
                let accepted = referee.validate_move(played.from, played.to)?;
                seq += 1;
                send(ServerFrame::table(
                    TABLE,
                    seq,
                    ServerMessage::Move {
                        played: WireMove::from(&accepted.record),
                        clocks: None,
                    },
                ))?;
                if accepted.status.is_over() {
                    continue;
                }
                if let SearchOutcome::Move { from, to } =
                    engine.select_move(referee.board(), Side::Black)
                {
                    let reply = referee.validate_move(from, to)?;
                    seq += 1;
                    send(ServerFrame::table(
                        TABLE,
                        seq,
                        ServerMessage::Move {
                            played: WireMove::from(&reply.record),
                            clocks: None,
                        },
                    ))?;
                }
            }
            ClientMessage::Logout => break,
            _ => {}
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Play through the facade
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    let server = tokio::spawn(serve(server_rx, server_tx));

    let connector = LoopbackConnector(Mutex::new(Some(LoopbackTransport {
        tx: client_tx,
        rx: client_rx,
    })));
    let (controller, mut events) = SessionController::new(connector, SessionConfig::new("demo"));
    let facade = SessionFacade::new(controller, MemorySettings::new());
    facade.on_ai_level_changed(2)?;

    let me = facade.login_server()?;
    tracing::info!("logging in as {me}");

    let mut replies = 0;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::LoginSucceeded { .. } => {
                facade.controller().join_table(Some(TABLE.into()))?;
            }
            SessionEvent::TableJoined { seat, .. } => {
                tracing::info!("seated as {seat:?}");
                facade.play_engine_move().await?;
            }
            SessionEvent::MoveApplied {
                record,
                remote: true,
            } => {
                tracing::info!("{} played {} -> {}", record.side, record.from, record.to);
                replies += 1;
                if replies == 3 || facade.is_game_over() {
                    break;
                }
                facade.play_engine_move().await?;
            }
            other => tracing::debug!("event: {other:?}"),
        }
    }

    tracing::info!("final position: {}", facade.table_view().board.to_fen());
    facade.logout().await;
    server.await??;
    Ok(())
}
