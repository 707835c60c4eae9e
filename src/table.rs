//! Session state and its transitions.
//!
//! [`TableState`] bundles everything the session mutates: connection state,
//! credentials, the [`Referee`], the [`ClockTracker`], the [`SeatTracker`],
//! the outgoing move queue and the chat buffer. Every method is one state
//! transition. Transitions never perform I/O; frames to send pile up in an
//! outbound queue and UI notifications in an event queue, both drained by
//! [`SessionController`](crate::controller::SessionController).

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::board::{Board, Position, Side};
use crate::clock::{ClockTracker, TimeControl};
use crate::error::{Result, SessionError};
use crate::error_codes::ErrorCode;
use crate::event::{ChatMessage, DeliveryOutcome, SessionEvent};
use crate::protocol::{
    ClientFrame, ClientMessage, ClockInfo, PlayerId, ServerFrame, ServerMessage, TableDelta,
    TableId, TableSnapshot, WireMove,
};
use crate::referee::{GameStatus, MoveAccepted, MoveRecord, Referee};
use crate::seats::{SeatTracker, TableType};

// ── Connection state ────────────────────────────────────────────────

/// Lifecycle of the server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Transport is up, login not yet accepted.
    Connected,
    Authenticated,
    /// The transport dropped after a confirmed login; trying to get back.
    Reconnecting,
}

impl ConnectionState {
    /// Connected or Authenticated.
    pub fn is_online(self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Player identity and secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub player_id: PlayerId,
    pub secret: String,
}

impl Credentials {
    pub fn new(player_id: impl Into<PlayerId>, secret: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("player_id", &self.player_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// What the connection driver should do after the transport dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLoss {
    /// Keep reconnecting. `fresh` is set when the lost link had fully
    /// recovered, so the retry budget starts over.
    Reconnect { fresh: bool },
    /// Give up; the session was never logged in.
    Offline,
}

/// A local move waiting for the server.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingMove {
    /// Table the move was made at.
    table_id: TableId,
    record: MoveRecord,
    /// Move count of the table when the move was made.
    base_count: u32,
    sent: bool,
}

impl PendingMove {
    fn matches(&self, wire: &WireMove) -> bool {
        self.record.number == wire.number && self.record.from == wire.from && self.record.to == wire.to
    }
}

/// Target of a join request that has not been answered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingJoin {
    table_id: Option<TableId>,
    as_observer: bool,
}

/// Read-only copy of the session state for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableView {
    pub connection: ConnectionState,
    pub login_confirmed: bool,
    pub player_id: Option<PlayerId>,
    pub table_id: Option<TableId>,
    pub table_type: TableType,
    pub board: Board,
    pub status: GameStatus,
    pub move_count: u32,
    pub red: Option<PlayerId>,
    pub black: Option<PlayerId>,
    pub observers: Vec<PlayerId>,
    pub red_remaining: Duration,
    pub black_remaining: Duration,
    pub pending_moves: usize,
}

// ── TableState ──────────────────────────────────────────────────────

/// All mutable session state. Guarded by a single lock in the controller.
#[derive(Debug)]
pub struct TableState {
    connection: ConnectionState,
    credentials: Option<Credentials>,
    login_confirmed: bool,
    client_version: Option<String>,
    /// Identity confirmed by the server.
    me: Option<PlayerId>,
    table_id: Option<TableId>,
    /// Join sent but not yet answered by a snapshot.
    pending_join: Option<PendingJoin>,
    observing: bool,
    last_seq: u64,
    next_out_seq: u64,
    awaiting_snapshot: bool,
    referee: Referee,
    clocks: ClockTracker,
    seats: SeatTracker,
    outbox: VecDeque<PendingMove>,
    outbox_capacity: usize,
    chat: Vec<ChatMessage>,
    chat_order: u64,
    events: Vec<SessionEvent>,
    outbound: Vec<ClientFrame>,
    close_request: Option<String>,
}

impl TableState {
    pub fn new(outbox_capacity: usize, time_control: TimeControl, client_version: Option<String>) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            credentials: None,
            login_confirmed: false,
            client_version,
            me: None,
            table_id: None,
            pending_join: None,
            observing: false,
            last_seq: 0,
            next_out_seq: 1,
            awaiting_snapshot: false,
            referee: Referee::new(),
            clocks: ClockTracker::new(time_control),
            seats: SeatTracker::new(TableType::Local),
            outbox: VecDeque::new(),
            outbox_capacity: outbox_capacity.max(1),
            chat: Vec::new(),
            chat_order: 0,
            events: Vec::new(),
            outbound: Vec::new(),
            close_request: None,
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_online(&self) -> bool {
        self.connection.is_online()
    }

    pub fn is_login_confirmed(&self) -> bool {
        self.login_confirmed
    }

    /// Credential edits are refused while a login is confirmed, including
    /// while the link is being re-established.
    pub fn credentials_locked(&self) -> bool {
        self.login_confirmed
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn player_id(&self) -> Option<&str> {
        self.me.as_deref()
    }

    pub fn active_table_id(&self) -> Option<&str> {
        self.table_id.as_deref()
    }

    pub fn awaiting_snapshot(&self) -> bool {
        self.awaiting_snapshot
    }

    pub fn game_status(&self) -> GameStatus {
        self.referee.status()
    }

    pub fn is_game_over(&self) -> bool {
        self.referee.status().is_over()
    }

    pub fn referee(&self) -> &Referee {
        &self.referee
    }

    pub fn clocks(&self) -> &ClockTracker {
        &self.clocks
    }

    pub fn seats(&self) -> &SeatTracker {
        &self.seats
    }

    pub fn pending_moves(&self) -> usize {
        self.outbox.len()
    }

    pub fn table_view(&self) -> TableView {
        TableView {
            connection: self.connection,
            login_confirmed: self.login_confirmed,
            player_id: self.me.clone(),
            table_id: self.table_id.clone(),
            table_type: self.seats.table_type(),
            board: self.referee.board().clone(),
            status: self.referee.status(),
            move_count: self.referee.move_count(),
            red: self.seats.player_at(Side::Red).map(str::to_owned),
            black: self.seats.player_at(Side::Black).map(str::to_owned),
            observers: self.seats.observers().to_vec(),
            red_remaining: self.clocks.remaining(Side::Red),
            black_remaining: self.clocks.remaining(Side::Black),
            pending_moves: self.outbox.len(),
        }
    }

    // ── Queues ──────────────────────────────────────────────────────

    /// Events produced since the last call, in transition order.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Frames waiting to be written to the transport.
    pub fn take_outbound(&mut self) -> Vec<ClientFrame> {
        std::mem::take(&mut self.outbound)
    }

    /// Set when the server asked us to go away or a reconnect login failed.
    pub fn take_close_request(&mut self) -> Option<String> {
        self.close_request.take()
    }

    /// Chat lines received since the last drain. The buffer is cleared.
    pub fn drain_chat(&mut self) -> Vec<ChatMessage> {
        std::mem::take(&mut self.chat)
    }

    fn emit(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    fn push_frame(&mut self, message: ClientMessage) {
        let table_id = match &message {
            ClientMessage::Login { .. } | ClientMessage::Logout | ClientMessage::JoinTable { .. } => None,
            _ => self.table_id.clone(),
        };
        let seq = self.next_out_seq;
        self.next_out_seq += 1;
        self.outbound.push(ClientFrame {
            table_id,
            seq,
            message,
        });
    }

    /// Queue a message for the server.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] unless the session is online.
    pub fn queue(&mut self, message: ClientMessage) -> Result<()> {
        if !self.is_online() {
            return Err(SessionError::NotConnected);
        }
        self.push_frame(message);
        Ok(())
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.connection == state {
            return;
        }
        info!(from = %self.connection, to = %state, "connection state changed");
        self.connection = state;
        self.emit(SessionEvent::ConnectionChanged { state });
    }

    fn note_status(&mut self, before: GameStatus) {
        let status = self.referee.status();
        if status != before {
            if status.is_over() {
                self.clocks.stop_all();
            }
            self.emit(SessionEvent::StatusChanged { status });
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Enter `Connecting` from `Disconnected`.
    ///
    /// Returns `false`, changing nothing, in any other state.
    pub fn begin_connect(&mut self) -> bool {
        if self.connection != ConnectionState::Disconnected {
            return false;
        }
        self.set_connection(ConnectionState::Connecting);
        true
    }

    /// A transport is up. Logs in again if credentials are known.
    pub fn transport_up(&mut self) {
        self.next_out_seq = 1;
        self.outbound.clear();
        if self.connection != ConnectionState::Reconnecting {
            self.set_connection(ConnectionState::Connected);
        }
        self.queue_login();
    }

    /// The transport dropped without us asking.
    pub fn transport_lost(&mut self, reason: &str) -> LinkLoss {
        self.outbound.clear();
        for pending in &mut self.outbox {
            pending.sent = false;
        }
        match self.connection {
            ConnectionState::Authenticated => {
                warn!(reason, "link lost, reconnecting");
                self.set_connection(ConnectionState::Reconnecting);
                LinkLoss::Reconnect { fresh: true }
            }
            ConnectionState::Reconnecting => LinkLoss::Reconnect { fresh: false },
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Disconnected => {
                LinkLoss::Offline
            }
        }
    }

    /// Drop to `Disconnected`: stop clocks, forget the login confirmation and
    /// abandon any move still waiting for the server.
    pub fn go_offline(&mut self) {
        self.login_confirmed = false;
        self.awaiting_snapshot = false;
        self.pending_join = None;
        self.outbound.clear();
        self.clocks.stop_all();
        self.discard_outbox();
        self.set_connection(ConnectionState::Disconnected);
    }

    /// Reconnection gave up or the server could not be reached.
    pub fn connectivity_failed(&mut self, reason: &str) {
        warn!(reason, "connectivity lost");
        self.go_offline();
        self.emit(SessionEvent::ConnectivityLost {
            reason: reason.to_owned(),
        });
    }

    // ── Credentials ─────────────────────────────────────────────────

    /// Remember the identity used for the next login.
    ///
    /// # Errors
    ///
    /// [`SessionError::AuthConflict`] while a login is confirmed; the
    /// confirmed identity is kept.
    pub fn set_credentials(&mut self, credentials: Credentials) -> Result<()> {
        if self.credentials_locked() {
            let player_id = self
                .credentials
                .as_ref()
                .map(|c| c.player_id.clone())
                .unwrap_or_default();
            debug!(%player_id, "credential change ignored while logged in");
            return Err(SessionError::AuthConflict { player_id });
        }
        self.credentials = Some(credentials);
        Ok(())
    }

    /// Queue a login with the stored credentials if the link is up.
    ///
    /// Returns whether a login was queued.
    pub fn queue_login(&mut self) -> bool {
        let link_up = matches!(
            self.connection,
            ConnectionState::Connected | ConnectionState::Reconnecting
        );
        let Some(credentials) = self.credentials.clone().filter(|_| link_up) else {
            return false;
        };
        self.push_frame(ClientMessage::Login {
            player_id: credentials.player_id,
            secret: credentials.secret,
            client_version: self.client_version.clone(),
        });
        true
    }

    /// Queue a logout and drop the login confirmation.
    pub fn queue_logout(&mut self) {
        if self.is_online() {
            self.push_frame(ClientMessage::Logout);
        }
        self.login_confirmed = false;
    }

    // ── Tables ──────────────────────────────────────────────────────

    /// Ask to join a table. The answer is a snapshot.
    ///
    /// Moves held for a different table are abandoned; they never follow the
    /// player to the new one.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotAuthenticated`] unless logged in.
    pub fn join_table(&mut self, table_id: Option<TableId>, as_observer: bool) -> Result<()> {
        if self.connection != ConnectionState::Authenticated {
            return Err(SessionError::NotAuthenticated);
        }
        if self.table_id.is_some() && self.table_id != table_id && !self.outbox.is_empty() {
            debug!(from = ?self.table_id, to = ?table_id, "switching tables, dropping held moves");
            self.discard_outbox();
        }
        self.observing = as_observer;
        self.awaiting_snapshot = true;
        self.pending_join = Some(PendingJoin {
            table_id: table_id.clone(),
            as_observer,
        });
        self.push_frame(ClientMessage::JoinTable {
            table_id,
            as_observer,
        });
        Ok(())
    }

    /// Leave the active table.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoActiveTable`] if not at a table.
    pub fn leave_table(&mut self) -> Result<()> {
        let table_id = self.table_id.take().ok_or(SessionError::NoActiveTable)?;
        if self.is_online() {
            // Sent with the table id still attached.
            let seq = self.next_out_seq;
            self.next_out_seq += 1;
            self.outbound.push(ClientFrame {
                table_id: Some(table_id.clone()),
                seq,
                message: ClientMessage::LeaveTable,
            });
        }
        self.awaiting_snapshot = false;
        self.pending_join = None;
        self.discard_outbox();
        self.clocks.stop_all();
        self.seats.reset(TableType::Local);
        self.last_seq = 0;
        info!(%table_id, "left table");
        self.emit(SessionEvent::TableLeft { table_id });
        Ok(())
    }

    /// Start an offline game on this device.
    pub fn start_local_game(&mut self) {
        if self.table_id.is_some() {
            if let Err(e) = self.leave_table() {
                warn!("could not leave the table before a local game: {e}");
            }
        }
        if self.pending_join.take().is_some() {
            debug!("unanswered join abandoned for a local game");
            self.awaiting_snapshot = false;
        }
        let before = self.referee.status();
        self.referee.reset();
        self.referee.start_game();
        self.clocks.reset();
        self.seats.reset(TableType::Local);
        if let Err(e) = self.clocks.start(Side::Red) {
            debug!("clock did not start: {e}");
        }
        info!("local game started");
        if before != GameStatus::InProgress {
            self.emit(SessionEvent::StatusChanged {
                status: GameStatus::InProgress,
            });
        }
    }

    /// Flag the local view as untrusted and ask the server for a snapshot.
    pub fn request_resync(&mut self, reason: &str) {
        let Some(table_id) = self.table_id.clone() else {
            return;
        };
        warn!(%table_id, reason, "requesting table resync");
        self.awaiting_snapshot = true;
        self.push_frame(ClientMessage::JoinTable {
            table_id: Some(table_id),
            as_observer: self.observing,
        });
        self.emit(SessionEvent::ResyncRequested {
            reason: reason.to_owned(),
        });
    }

    // ── Moves and clocks ────────────────────────────────────────────

    /// Validate a move made on this device and, at a networked table, queue
    /// it for the server.
    ///
    /// # Errors
    ///
    /// Rule violations come back as [`SessionError::Rule`]. At a networked
    /// table the move is also refused without an active table, when the
    /// local player does not hold the seat to move, or when the outbox is
    /// full.
    pub fn submit_local_move(&mut self, from: Position, to: Position) -> Result<MoveAccepted> {
        let networked = self.seats.table_type() == TableType::Networked;
        if networked {
            if self.table_id.is_none() {
                return Err(SessionError::NoActiveTable);
            }
            let side = self.referee.side_to_move();
            let me = self.me.as_deref().ok_or(SessionError::NotAuthenticated)?;
            if self.seats.player_at(side) != Some(me) {
                return Err(SessionError::NotSeated { side });
            }
            if self.outbox.len() >= self.outbox_capacity {
                return Err(SessionError::OutboxFull);
            }
        }

        let before = self.referee.status();
        let accepted = self.referee.validate_move(from, to).map_err(|e| {
            debug!(%from, %to, "move rejected: {e}");
            SessionError::from(e)
        })?;
        self.after_move(&accepted, before, false);

        if let Some(table_id) = self.table_id.clone().filter(|_| networked) {
            self.outbox.push_back(PendingMove {
                table_id,
                record: accepted.record,
                base_count: accepted.record.number - 1,
                sent: false,
            });
            self.release_moves();
        }
        Ok(accepted)
    }

    fn after_move(&mut self, accepted: &MoveAccepted, before: GameStatus, remote: bool) {
        self.emit(SessionEvent::MoveApplied {
            record: accepted.record,
            remote,
        });
        if accepted.status == GameStatus::InProgress {
            if let Err(e) = self.clocks.switch_to(accepted.record.side.opponent()) {
                debug!("clock not switched: {e}");
            }
        }
        self.note_status(before);
    }

    /// Send every held move, if the session can deliver them now.
    pub fn release_moves(&mut self) {
        if self.connection != ConnectionState::Authenticated || self.awaiting_snapshot {
            return;
        }
        let Some(table_id) = self.table_id.clone() else {
            return;
        };
        let mut sent = Vec::new();
        for pending in self.outbox.iter_mut().filter(|p| !p.sent) {
            pending.sent = true;
            sent.push(pending.record);
        }
        for record in sent {
            debug!(%table_id, number = record.number, "sending move");
            self.push_frame(ClientMessage::Move(WireMove::from(&record)));
            self.emit(SessionEvent::MoveDelivery {
                number: record.number,
                outcome: DeliveryOutcome::Sent,
            });
        }
    }

    fn discard_outbox(&mut self) {
        while let Some(pending) = self.outbox.pop_front() {
            self.emit(SessionEvent::MoveDelivery {
                number: pending.record.number,
                outcome: DeliveryOutcome::Discarded,
            });
        }
    }

    /// Advance the running clock by `elapsed`.
    ///
    /// At a local table an expired clock loses the game; at a networked table
    /// the server rules on it.
    pub fn tick(&mut self, elapsed: Duration) {
        let Some(side) = self.clocks.tick(elapsed) else {
            return;
        };
        self.emit(SessionEvent::ClockExpired { side });
        if self.seats.table_type() == TableType::Local {
            let before = self.referee.status();
            self.referee.conclude(GameStatus::win_for(side.opponent()));
            self.note_status(before);
        }
    }

    /// Resign the game for the side to move at a local table, or for us at
    /// a networked one.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] at a networked table while offline.
    pub fn resign(&mut self) -> Result<()> {
        if self.seats.table_type() == TableType::Networked {
            if self.table_id.is_none() {
                return Err(SessionError::NoActiveTable);
            }
            return self.queue(ClientMessage::Resign);
        }
        let before = self.referee.status();
        let loser = self.referee.side_to_move();
        self.referee.conclude(GameStatus::win_for(loser.opponent()));
        self.note_status(before);
        Ok(())
    }

    /// Offer a draw at the active networked table.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoActiveTable`] without one.
    pub fn offer_draw(&mut self) -> Result<()> {
        if self.table_id.is_none() {
            return Err(SessionError::NoActiveTable);
        }
        self.queue(ClientMessage::OfferDraw)
    }

    fn reconcile_clocks(&mut self, clocks: &ClockInfo) {
        for side in Side::ALL {
            self.clocks.reconcile(side, clocks.remaining(side));
        }
        self.emit(SessionEvent::ClocksUpdated {
            red: self.clocks.remaining(Side::Red),
            black: self.clocks.remaining(Side::Black),
        });
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Apply one frame from the server.
    pub fn apply_frame(&mut self, frame: ServerFrame) {
        let ServerFrame {
            table_id,
            seq,
            message,
        } = frame;

        let Some(table_id) = table_id else {
            self.apply_session_message(message);
            return;
        };

        if let ServerMessage::TableSnapshot(snapshot) = message {
            let current = self.table_id.as_deref() == Some(table_id.as_str());
            if !self.awaiting_snapshot && (!current || seq <= self.last_seq) {
                debug!(%table_id, seq, "dropping unrequested snapshot");
                return;
            }
            self.apply_snapshot(*snapshot, seq);
            return;
        }

        if self.table_id.as_deref() != Some(table_id.as_str()) {
            debug!(%table_id, seq, "ignoring frame for inactive table");
            return;
        }
        if self.awaiting_snapshot {
            debug!(%table_id, seq, "dropping delta while awaiting snapshot");
            return;
        }
        if seq <= self.last_seq {
            debug!(%table_id, seq, last_seq = self.last_seq, "dropping stale frame");
            return;
        }
        if seq > self.last_seq + 1 {
            warn!(%table_id, seq, last_seq = self.last_seq, "sequence gap");
            self.request_resync("sequence gap");
            return;
        }
        self.last_seq = seq;

        match message {
            ServerMessage::Move { played, clocks } => self.apply_remote_move(played, clocks),
            ServerMessage::TableDelta(delta) => self.apply_delta(delta),
            ServerMessage::Chat { sender, text } => self.push_chat(sender, text),
            other => self.apply_session_message(other),
        }
    }

    fn apply_session_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::LoginAccepted { player_id, .. } => self.on_login_accepted(player_id),
            ServerMessage::LoginRejected { error_code, reason } => {
                self.on_login_rejected(error_code, reason);
            }
            ServerMessage::Chat { sender, text } => self.push_chat(sender, text),
            ServerMessage::DisconnectNotice { reason } => {
                info!(reason, "server sent disconnect notice");
                self.close_request = Some(reason);
            }
            ServerMessage::Error {
                message,
                error_code,
            } => {
                warn!(?error_code, "server error: {message}");
                if matches!(error_code, Some(ErrorCode::IllegalMove | ErrorCode::NotYourTurn)) {
                    self.request_resync("server rejected a move");
                }
                self.emit(SessionEvent::ServerError {
                    message,
                    error_code,
                });
            }
            ServerMessage::Pong => debug!("pong"),
            other => warn!(?other, "table message without a table id"),
        }
    }

    fn on_login_accepted(&mut self, player_id: PlayerId) {
        info!(%player_id, "login accepted");
        self.login_confirmed = true;
        self.me = Some(player_id.clone());
        self.emit(SessionEvent::LoginSucceeded { player_id });
        if self.connection == ConnectionState::Reconnecting {
            if let Some(join) = self.pending_join.clone() {
                // The link dropped before the join was answered; the
                // snapshot completes the reconnection.
                info!(table_id = ?join.table_id, "sending table join again");
                self.awaiting_snapshot = true;
                self.push_frame(ClientMessage::JoinTable {
                    table_id: join.table_id,
                    as_observer: join.as_observer,
                });
                return;
            }
            if self.table_id.is_some() {
                self.request_resync("reconnected");
                return;
            }
        }
        self.set_connection(ConnectionState::Authenticated);
        self.release_moves();
    }

    fn on_login_rejected(&mut self, error_code: ErrorCode, reason: String) {
        let auth_conflict = error_code.is_auth_conflict();
        warn!(?error_code, auth_conflict, "login rejected: {reason}");
        self.login_confirmed = false;
        if self.connection == ConnectionState::Reconnecting {
            self.close_request = Some(format!("login rejected while reconnecting: {reason}"));
        }
        self.emit(SessionEvent::LoginFailed {
            error_code,
            reason,
            auth_conflict,
        });
    }

    fn push_chat(&mut self, sender: PlayerId, text: String) {
        self.chat_order += 1;
        self.chat.push(ChatMessage {
            sender: sender.clone(),
            text,
            order: self.chat_order,
        });
        self.emit(SessionEvent::ChatReceived { sender });
    }

    /// Replace referee, clocks and seats with the server's snapshot, then
    /// settle the moves still waiting in the outbox.
    fn apply_snapshot(&mut self, snapshot: TableSnapshot, seq: u64) {
        let TableSnapshot {
            table_id,
            board,
            move_count,
            status,
            red,
            black,
            observers,
            clocks,
            last_move,
        } = snapshot;
        info!(%table_id, seq, move_count, ?status, "applying table snapshot");

        let joined = self.table_id.as_deref() != Some(table_id.as_str());
        let side_to_move = board.side_to_move();
        self.referee.load_snapshot(board, move_count, status);
        self.clocks.restore(
            clocks.remaining(Side::Red),
            clocks.remaining(Side::Black),
            side_to_move,
            status == GameStatus::InProgress,
        );
        self.seats.restore(TableType::Networked, red, black, observers);
        self.table_id = Some(table_id.clone());
        self.pending_join = None;
        self.last_seq = seq;
        self.awaiting_snapshot = false;

        if joined {
            let seat = self.me.as_deref().and_then(|me| self.seats.seat_of(me));
            self.emit(SessionEvent::TableJoined {
                table_id: table_id.clone(),
                seat,
            });
        }
        self.emit(SessionEvent::StatusChanged { status });
        self.emit(SessionEvent::ClocksUpdated {
            red: clocks.remaining(Side::Red),
            black: clocks.remaining(Side::Black),
        });
        self.emit(SessionEvent::SeatsChanged);

        let held: Vec<PendingMove> = self.outbox.drain(..).collect();
        for pending in held {
            let number = pending.record.number;
            let outcome = if pending.table_id != table_id {
                DeliveryOutcome::Discarded
            } else if last_move.is_some_and(|m| pending.matches(&m)) {
                DeliveryOutcome::Acknowledged
            } else if self.referee.move_count() == pending.base_count
                && self.referee.status() == GameStatus::InProgress
                && self
                    .referee
                    .validate_move(pending.record.from, pending.record.to)
                    .is_ok()
            {
                if let Some(record) = self.referee.last_move().copied() {
                    self.outbox.push_back(PendingMove {
                        table_id: table_id.clone(),
                        record,
                        base_count: pending.base_count,
                        sent: false,
                    });
                    self.emit(SessionEvent::MoveApplied {
                        record,
                        remote: false,
                    });
                }
                DeliveryOutcome::Replayed
            } else {
                DeliveryOutcome::Discarded
            };
            debug!(%table_id, number, ?outcome, "settled held move");
            self.emit(SessionEvent::MoveDelivery { number, outcome });
        }
        if !self.outbox.is_empty() {
            if let Err(e) = self.clocks.switch_to(self.referee.side_to_move()) {
                debug!("clock not switched after replay: {e}");
            }
        }

        if self.connection == ConnectionState::Reconnecting {
            self.set_connection(ConnectionState::Authenticated);
        }
        self.emit(SessionEvent::ResyncCompleted {
            table_id,
            move_count: self.referee.move_count(),
        });
        self.release_moves();
    }

    fn apply_remote_move(&mut self, played: WireMove, clocks: Option<ClockInfo>) {
        let count = self.referee.move_count();
        if count.checked_add(1) == Some(played.number) {
            let before = self.referee.status();
            match self.referee.validate_move(played.from, played.to) {
                Ok(accepted) => self.after_move(&accepted, before, true),
                Err(e) => {
                    warn!(number = played.number, "server move rejected locally: {e}");
                    self.request_resync("server move failed local validation");
                    return;
                }
            }
        } else if played.number <= count {
            if let Some(i) = self.outbox.iter().position(|p| p.matches(&played)) {
                // Everything before our echo has been taken as well.
                let acked: Vec<PendingMove> = self.outbox.drain(..=i).collect();
                for pending in acked {
                    self.emit(SessionEvent::MoveDelivery {
                        number: pending.record.number,
                        outcome: DeliveryOutcome::Acknowledged,
                    });
                }
            } else {
                let known = self.referee.moves().iter().any(|m| {
                    m.number == played.number && m.from == played.from && m.to == played.to
                });
                if !known {
                    self.request_resync("move history diverged");
                    return;
                }
            }
        } else {
            self.request_resync("move number gap");
            return;
        }

        if let Some(clocks) = clocks {
            self.reconcile_clocks(&clocks);
        }
    }

    fn apply_delta(&mut self, delta: TableDelta) {
        match delta {
            TableDelta::SeatTaken { side, player_id } => {
                if let Err(e) = self.seats.assign_seat(&player_id, side) {
                    // The snapshot puts the right player back in the seat.
                    warn!(%player_id, %side, "seat state diverged from the server: {e}");
                    self.seats.vacate_seat(side);
                    self.request_resync("seat state diverged");
                }
                self.emit(SessionEvent::SeatsChanged);
            }
            TableDelta::SeatVacated { side } => {
                self.seats.vacate_seat(side);
                self.emit(SessionEvent::SeatsChanged);
            }
            TableDelta::ObserverJoined { player_id } => {
                self.seats.add_observer(&player_id);
                self.emit(SessionEvent::SeatsChanged);
            }
            TableDelta::ObserverLeft { player_id } => {
                self.seats.remove_player(&player_id);
                self.emit(SessionEvent::SeatsChanged);
            }
            TableDelta::GameStarted { clocks } => {
                let before = self.referee.status();
                self.referee.start_game();
                self.clocks.restore(
                    clocks.remaining(Side::Red),
                    clocks.remaining(Side::Black),
                    self.referee.side_to_move(),
                    true,
                );
                self.note_status(before);
                self.emit(SessionEvent::ClocksUpdated {
                    red: clocks.remaining(Side::Red),
                    black: clocks.remaining(Side::Black),
                });
            }
            TableDelta::GameEnded { status, reason } => {
                info!(?status, reason = reason.as_deref().unwrap_or(""), "server ended the game");
                let before = self.referee.status();
                self.referee.conclude(status);
                self.clocks.stop_all();
                self.discard_outbox();
                self.note_status(before);
            }
            TableDelta::ClockSync { clocks } => self.reconcile_clocks(&clocks),
            TableDelta::DrawOffered { by } => self.emit(SessionEvent::DrawOffered { by }),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error::RuleViolation;

    const TABLE: &str = "t1";

    fn pos(file: u8, rank: u8) -> Position {
        Position::new(file, rank).unwrap()
    }

    fn state() -> TableState {
        TableState::new(4, TimeControl::default(), None)
    }

    fn logged_in(player: &str) -> TableState {
        let mut s = state();
        s.set_credentials(Credentials::new(player, "pw")).unwrap();
        assert!(s.begin_connect());
        s.transport_up();
        s.apply_frame(ServerFrame::session(ServerMessage::LoginAccepted {
            player_id: player.into(),
            rating: None,
        }));
        s.take_outbound();
        s.take_events();
        s
    }

    fn snapshot(board: Board, move_count: u32, red: &str, black: &str) -> ServerMessage {
        ServerMessage::TableSnapshot(Box::new(TableSnapshot {
            table_id: TABLE.into(),
            board,
            move_count,
            status: GameStatus::InProgress,
            red: Some(red.into()),
            black: Some(black.into()),
            observers: vec![],
            clocks: ClockInfo {
                red_ms: 60_000,
                black_ms: 50_000,
            },
            last_move: None,
        }))
    }

    fn seated(player: &str) -> TableState {
        let mut s = logged_in(player);
        s.join_table(Some(TABLE.into()), false).unwrap();
        s.apply_frame(ServerFrame::table(
            TABLE,
            1,
            snapshot(Board::initial(), 0, player, "bob"),
        ));
        s.take_outbound();
        s.take_events();
        s
    }

    fn chat(seq: u64, text: &str) -> ServerFrame {
        ServerFrame::table(
            TABLE,
            seq,
            ServerMessage::Chat {
                sender: "bob".into(),
                text: text.into(),
            },
        )
    }

    #[test]
    fn connect_sends_login_and_login_authenticates() {
        let mut s = state();
        s.set_credentials(Credentials::new("alice", "pw")).unwrap();
        assert!(s.begin_connect());
        assert!(!s.begin_connect());
        s.transport_up();
        assert_eq!(s.connection(), ConnectionState::Connected);
        let frames = s.take_outbound();
        assert!(matches!(
            &frames[..],
            [ClientFrame { message: ClientMessage::Login { player_id, .. }, .. }] if player_id == "alice"
        ));

        s.apply_frame(ServerFrame::session(ServerMessage::LoginAccepted {
            player_id: "alice".into(),
            rating: Some(1500),
        }));
        assert_eq!(s.connection(), ConnectionState::Authenticated);
        assert!(s.is_login_confirmed());
        assert!(s.is_online());
    }

    #[test]
    fn credentials_are_kept_while_login_confirmed() {
        let mut s = logged_in("p1");
        let err = s.set_credentials(Credentials::new("p2", "x")).unwrap_err();
        assert!(matches!(err, SessionError::AuthConflict { ref player_id } if player_id == "p1"));
        assert_eq!(s.credentials().unwrap().player_id, "p1");

        let mut connected = state();
        connected.set_credentials(Credentials::new("p1", "pw")).unwrap();
        connected.begin_connect();
        connected.transport_up();
        connected.set_credentials(Credentials::new("p2", "x")).unwrap();
        assert_eq!(connected.credentials().unwrap().player_id, "p2");
    }

    #[test]
    fn rejected_login_stays_connected() {
        let mut s = state();
        s.set_credentials(Credentials::new("p1", "pw")).unwrap();
        s.begin_connect();
        s.transport_up();
        s.take_events();
        s.apply_frame(ServerFrame::session(ServerMessage::LoginRejected {
            error_code: ErrorCode::AlreadyLoggedIn,
            reason: "elsewhere".into(),
        }));
        assert_eq!(s.connection(), ConnectionState::Connected);
        assert!(!s.is_login_confirmed());
        assert_eq!(
            s.take_events(),
            vec![SessionEvent::LoginFailed {
                error_code: ErrorCode::AlreadyLoggedIn,
                reason: "elsewhere".into(),
                auth_conflict: true,
            }]
        );
    }

    #[test]
    fn duplicate_and_stale_frames_are_dropped() {
        let mut s = seated("alice");
        s.apply_frame(chat(2, "one"));
        s.apply_frame(chat(2, "one again"));
        s.apply_frame(chat(1, "old"));
        s.apply_frame(chat(3, "two"));
        let texts: Vec<_> = s.drain_chat().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, ["one", "two"]);
        assert!(s.drain_chat().is_empty());
    }

    #[test]
    fn sequence_gap_forces_resync() {
        let mut s = seated("alice");
        s.apply_frame(chat(5, "skipped ahead"));
        assert!(s.awaiting_snapshot());
        assert!(s.drain_chat().is_empty());
        let frames = s.take_outbound();
        assert!(matches!(
            frames[0].message,
            ClientMessage::JoinTable { table_id: Some(ref t), .. } if t == TABLE
        ));

        // Deltas are ignored until the snapshot lands.
        s.apply_frame(chat(6, "ignored"));
        assert!(s.drain_chat().is_empty());
    }

    #[test]
    fn frames_for_other_tables_are_ignored() {
        let mut s = seated("alice");
        s.apply_frame(ServerFrame::table(
            "elsewhere",
            2,
            ServerMessage::Chat {
                sender: "x".into(),
                text: "hi".into(),
            },
        ));
        assert!(s.drain_chat().is_empty());
        assert!(!s.awaiting_snapshot());
    }

    #[test]
    fn local_move_is_sent_and_acknowledged() {
        let mut s = seated("alice");
        let accepted = s.submit_local_move(pos(1, 2), pos(4, 2)).unwrap();
        assert_eq!(accepted.record.number, 1);
        let frames = s.take_outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].table_id.as_deref(), Some(TABLE));
        assert_eq!(s.pending_moves(), 1);

        s.apply_frame(ServerFrame::table(
            TABLE,
            2,
            ServerMessage::Move {
                played: WireMove::from(&accepted.record),
                clocks: Some(ClockInfo {
                    red_ms: 59_000,
                    black_ms: 50_000,
                }),
            },
        ));
        assert_eq!(s.pending_moves(), 0);
        assert_eq!(s.referee().move_count(), 1);
        assert_eq!(s.clocks().remaining(Side::Red), Duration::from_secs(59));
        assert!(s.take_events().contains(&SessionEvent::MoveDelivery {
            number: 1,
            outcome: DeliveryOutcome::Acknowledged
        }));
    }

    #[test]
    fn remote_move_is_applied() {
        let mut s = seated("carol");
        s.submit_local_move(pos(1, 2), pos(4, 2)).unwrap();
        s.apply_frame(ServerFrame::table(
            TABLE,
            2,
            ServerMessage::Move {
                played: WireMove {
                    from: pos(7, 9),
                    to: pos(6, 7),
                    side: Side::Black,
                    number: 2,
                },
                clocks: None,
            },
        ));
        assert_eq!(s.referee().move_count(), 2);
        assert_eq!(s.referee().side_to_move(), Side::Red);
    }

    #[test]
    fn only_the_seated_player_may_move() {
        let mut s = seated("alice");
        s.submit_local_move(pos(1, 2), pos(4, 2)).unwrap();
        let err = s.submit_local_move(pos(7, 9), pos(6, 7)).unwrap_err();
        assert!(matches!(err, SessionError::NotSeated { side: Side::Black }));
        assert_eq!(s.referee().move_count(), 1);
    }

    #[test]
    fn rule_violations_are_not_transmitted() {
        let mut s = seated("alice");
        let err = s.submit_local_move(pos(0, 0), pos(1, 1)).unwrap_err();
        assert!(matches!(err, SessionError::Rule(_)));
        assert!(s.take_outbound().is_empty());
        assert_eq!(s.pending_moves(), 0);
    }

    #[test]
    fn moves_are_held_while_reconnecting() {
        let mut s = seated("alice");
        assert_eq!(
            s.transport_lost("reset"),
            LinkLoss::Reconnect { fresh: true }
        );
        assert_eq!(s.connection(), ConnectionState::Reconnecting);
        assert!(s.is_login_confirmed());
        assert!(!s.is_online());

        s.submit_local_move(pos(1, 2), pos(4, 2)).unwrap();
        assert!(s.take_outbound().is_empty());
        assert_eq!(s.pending_moves(), 1);
    }

    #[test]
    fn outbox_is_bounded() {
        let mut s = TableState::new(1, TimeControl::default(), None);
        s.set_credentials(Credentials::new("alice", "pw")).unwrap();
        s.begin_connect();
        s.transport_up();
        s.apply_frame(ServerFrame::session(ServerMessage::LoginAccepted {
            player_id: "alice".into(),
            rating: None,
        }));
        s.join_table(Some(TABLE.into()), false).unwrap();
        s.apply_frame(ServerFrame::table(
            TABLE,
            1,
            snapshot(Board::initial(), 0, "alice", "bob"),
        ));
        s.submit_local_move(pos(1, 2), pos(4, 2)).unwrap();
        // Bob replies before our move is echoed back.
        s.apply_frame(ServerFrame::table(
            TABLE,
            2,
            ServerMessage::Move {
                played: WireMove {
                    from: pos(7, 9),
                    to: pos(6, 7),
                    side: Side::Black,
                    number: 2,
                },
                clocks: None,
            },
        ));
        assert_eq!(s.pending_moves(), 1);
        let err = s.submit_local_move(pos(7, 0), pos(6, 2)).unwrap_err();
        assert!(matches!(err, SessionError::OutboxFull));
        assert_eq!(s.referee().move_count(), 2);
    }

    #[test]
    fn switching_tables_drops_held_moves() {
        let mut s = seated("alice");
        s.submit_local_move(pos(1, 2), pos(4, 2)).unwrap();
        s.take_outbound();
        s.take_events();

        s.join_table(Some("t2".into()), false).unwrap();
        assert_eq!(s.pending_moves(), 0);
        assert!(s.take_events().contains(&SessionEvent::MoveDelivery {
            number: 1,
            outcome: DeliveryOutcome::Discarded
        }));

        let mut snap = match snapshot(Board::initial(), 0, "dave", "alice") {
            ServerMessage::TableSnapshot(snap) => snap,
            _ => unreachable!(),
        };
        snap.table_id = "t2".into();
        s.apply_frame(ServerFrame::table("t2", 5, ServerMessage::TableSnapshot(snap)));

        assert_eq!(s.active_table_id(), Some("t2"));
        assert_eq!(s.referee().move_count(), 0);
        assert_eq!(s.referee().board(), &Board::initial());
        let frames = s.take_outbound();
        assert!(
            !frames.iter().any(|f| matches!(f.message, ClientMessage::Move(_))),
            "held move followed the player to another table: {frames:?}"
        );
        assert!(s.take_events().contains(&SessionEvent::TableJoined {
            table_id: "t2".into(),
            seat: Some(Side::Black),
        }));
    }

    #[test]
    fn unanswered_join_is_sent_again_after_reconnect() {
        let mut s = logged_in("alice");
        s.join_table(Some(TABLE.into()), true).unwrap();
        s.take_outbound();

        assert_eq!(
            s.transport_lost("reset"),
            LinkLoss::Reconnect { fresh: true }
        );
        s.transport_up();
        s.take_outbound();
        s.apply_frame(ServerFrame::session(ServerMessage::LoginAccepted {
            player_id: "alice".into(),
            rating: None,
        }));

        assert_eq!(s.connection(), ConnectionState::Reconnecting);
        assert!(s.awaiting_snapshot());
        let frames = s.take_outbound();
        assert!(matches!(
            &frames[..],
            [ClientFrame {
                message: ClientMessage::JoinTable { table_id: Some(t), as_observer: true },
                ..
            }] if t == TABLE
        ));

        s.take_events();
        s.apply_frame(ServerFrame::table(
            TABLE,
            1,
            snapshot(Board::initial(), 0, "bob", "carol"),
        ));
        assert_eq!(s.active_table_id(), Some(TABLE));
        assert_eq!(s.connection(), ConnectionState::Authenticated);
        assert!(!s.awaiting_snapshot());
        assert!(s.take_events().contains(&SessionEvent::TableJoined {
            table_id: TABLE.into(),
            seat: None,
        }));
    }

    #[test]
    fn local_game_abandons_an_unanswered_join() {
        let mut s = logged_in("alice");
        s.join_table(Some(TABLE.into()), false).unwrap();
        s.start_local_game();
        assert!(!s.awaiting_snapshot());

        s.apply_frame(ServerFrame::table(
            TABLE,
            1,
            snapshot(Board::initial(), 0, "alice", "bob"),
        ));
        assert_eq!(s.active_table_id(), None);
        assert_eq!(s.seats().table_type(), TableType::Local);
    }

    #[test]
    fn exhausted_move_counter_from_server_forces_resync() {
        let mut s = seated("alice");
        s.apply_frame(ServerFrame::table(
            TABLE,
            2,
            snapshot(Board::initial(), u32::MAX, "alice", "bob"),
        ));
        assert_eq!(s.referee().move_count(), u32::MAX);

        let err = s.submit_local_move(pos(1, 2), pos(4, 2)).unwrap_err();
        assert!(matches!(err, SessionError::Rule(RuleViolation::MoveLimit)));
        assert_eq!(s.pending_moves(), 0);
        s.take_events();

        s.apply_frame(ServerFrame::table(
            TABLE,
            3,
            ServerMessage::Move {
                played: WireMove {
                    from: pos(1, 2),
                    to: pos(4, 2),
                    side: Side::Red,
                    number: 0,
                },
                clocks: None,
            },
        ));
        assert!(s.awaiting_snapshot());
        assert_eq!(s.referee().move_count(), u32::MAX);
        assert!(s
            .take_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::ResyncRequested { .. })));
    }

    #[test]
    fn conflicting_seat_delta_forces_resync() {
        let mut s = seated("alice");
        s.apply_frame(ServerFrame::table(
            TABLE,
            2,
            ServerMessage::TableDelta(TableDelta::SeatTaken {
                side: Side::Black,
                player_id: "carol".into(),
            }),
        ));
        assert!(s.awaiting_snapshot());
        assert_eq!(s.seats().player_at(Side::Black), None);
        assert_eq!(s.seats().player_at(Side::Red), Some("alice"));
        let frames = s.take_outbound();
        assert!(matches!(
            frames[..],
            [ClientFrame { message: ClientMessage::JoinTable { .. }, .. }]
        ));
        assert!(s
            .take_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::ResyncRequested { .. })));
    }

    #[test]
    fn resync_discards_moves_made_on_a_stale_table() {
        let mut s = seated("alice");
        // Reach move count 5 with Red to move next... then lose the link.
        let line = [
            ((1, 2), (4, 2)),
            ((7, 9), (6, 7)),
            ((7, 0), (6, 2)),
            ((8, 9), (7, 9)),
        ];
        let mut seq = 1;
        for (i, ((ff, fr), (tf, tr))) in line.into_iter().enumerate() {
            seq += 1;
            s.apply_frame(ServerFrame::table(
                TABLE,
                seq,
                ServerMessage::Move {
                    played: WireMove {
                        from: pos(ff, fr),
                        to: pos(tf, tr),
                        side: if i % 2 == 0 { Side::Red } else { Side::Black },
                        number: u32::try_from(i).unwrap() + 1,
                    },
                    clocks: None,
                },
            ));
        }
        s.submit_local_move(pos(8, 0), pos(8, 1)).unwrap();
        assert_eq!(s.referee().move_count(), 5);
        s.take_outbound();
        s.take_events();

        s.transport_lost("reset");
        s.transport_up();
        s.apply_frame(ServerFrame::session(ServerMessage::LoginAccepted {
            player_id: "alice".into(),
            rating: None,
        }));
        assert!(s.awaiting_snapshot());
        assert_eq!(s.connection(), ConnectionState::Reconnecting);
        s.take_outbound();

        let server_board =
            Board::from_fen("rnbakabr1/9/1c4nc1/p1p1p1p1p/9/9/P1P1P1P1P/1C2C1N2/9/RNBAKAB1R b")
                .unwrap();
        let mut snap = match snapshot(server_board.clone(), 8, "alice", "bob") {
            ServerMessage::TableSnapshot(snap) => snap,
            _ => unreachable!(),
        };
        snap.status = GameStatus::BlackWins;
        snap.clocks = ClockInfo {
            red_ms: 1_000,
            black_ms: 2_000,
        };
        s.apply_frame(ServerFrame::table(
            TABLE,
            40,
            ServerMessage::TableSnapshot(snap),
        ));

        assert_eq!(s.connection(), ConnectionState::Authenticated);
        assert_eq!(s.referee().board(), &server_board);
        assert_eq!(s.referee().move_count(), 8);
        assert_eq!(s.game_status(), GameStatus::BlackWins);
        assert_eq!(s.clocks().remaining(Side::Red), Duration::from_secs(1));
        assert_eq!(s.clocks().remaining(Side::Black), Duration::from_secs(2));
        assert_eq!(s.seats().player_at(Side::Black), Some("bob"));
        assert_eq!(s.pending_moves(), 0);
        assert!(s.take_outbound().is_empty());
        assert!(s.take_events().contains(&SessionEvent::MoveDelivery {
            number: 5,
            outcome: DeliveryOutcome::Discarded
        }));
    }

    #[test]
    fn resync_replays_moves_when_table_unchanged() {
        let mut s = seated("alice");
        s.transport_lost("reset");
        s.submit_local_move(pos(1, 2), pos(4, 2)).unwrap();
        s.transport_up();
        s.take_outbound();
        s.apply_frame(ServerFrame::session(ServerMessage::LoginAccepted {
            player_id: "alice".into(),
            rating: None,
        }));
        s.take_outbound();
        s.apply_frame(ServerFrame::table(
            TABLE,
            3,
            snapshot(Board::initial(), 0, "alice", "bob"),
        ));

        assert_eq!(s.referee().move_count(), 1);
        assert_eq!(s.pending_moves(), 1);
        let frames = s.take_outbound();
        assert!(matches!(
            frames[..],
            [ClientFrame { message: ClientMessage::Move(WireMove { number: 1, .. }), .. }]
        ));
        assert!(s.take_events().contains(&SessionEvent::MoveDelivery {
            number: 1,
            outcome: DeliveryOutcome::Replayed
        }));
    }

    #[test]
    fn login_rejected_while_reconnecting_requests_close() {
        let mut s = seated("alice");
        s.transport_lost("reset");
        s.transport_up();
        s.apply_frame(ServerFrame::session(ServerMessage::LoginRejected {
            error_code: ErrorCode::AlreadyLoggedIn,
            reason: "elsewhere".into(),
        }));
        assert!(s.take_close_request().is_some());
        assert!(!s.is_login_confirmed());
    }

    #[test]
    fn local_game_enforces_turns_and_times_out() {
        let mut s = state();
        s.start_local_game();
        assert_eq!(s.game_status(), GameStatus::InProgress);
        assert!(s.submit_local_move(pos(0, 6), pos(0, 5)).is_err());
        assert_eq!(s.referee().move_count(), 0);
        s.submit_local_move(pos(1, 2), pos(4, 2)).unwrap();
        assert_eq!(s.referee().move_count(), 1);
        assert!(s.take_outbound().is_empty());

        s.tick(Duration::from_secs(16 * 60));
        assert_eq!(s.game_status(), GameStatus::RedWins);
        let events = s.take_events();
        assert!(events.contains(&SessionEvent::ClockExpired { side: Side::Black }));
        assert!(events.contains(&SessionEvent::StatusChanged {
            status: GameStatus::RedWins
        }));
    }

    #[test]
    fn local_resign_ends_game_for_side_to_move() {
        let mut s = state();
        s.start_local_game();
        s.resign().unwrap();
        assert_eq!(s.game_status(), GameStatus::BlackWins);
    }

    #[test]
    fn server_can_end_the_game() {
        let mut s = seated("alice");
        s.apply_frame(ServerFrame::table(
            TABLE,
            2,
            ServerMessage::TableDelta(TableDelta::GameEnded {
                status: GameStatus::Draw,
                reason: Some("agreed".into()),
            }),
        ));
        assert_eq!(s.game_status(), GameStatus::Draw);
        assert!(s.clocks().running_side().is_none());
    }

    #[test]
    fn leave_table_resets_table_state() {
        let mut s = seated("alice");
        s.leave_table().unwrap();
        assert_eq!(s.active_table_id(), None);
        let frames = s.take_outbound();
        assert_eq!(frames[0].message, ClientMessage::LeaveTable);
        assert_eq!(frames[0].table_id.as_deref(), Some(TABLE));
        assert!(matches!(s.leave_table(), Err(SessionError::NoActiveTable)));
    }

    #[test]
    fn transport_loss_before_login_goes_offline() {
        let mut s = state();
        s.begin_connect();
        s.transport_up();
        assert_eq!(s.transport_lost("eof"), LinkLoss::Offline);
        s.connectivity_failed("eof");
        assert_eq!(s.connection(), ConnectionState::Disconnected);
        assert!(s
            .take_events()
            .contains(&SessionEvent::ConnectivityLost { reason: "eof".into() }));
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let rendered = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }
}
