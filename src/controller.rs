//! The session controller: one connection driver around one [`TableState`].
//!
//! [`SessionController`] is a handle shared by the UI. Every call locks the
//! table state for exactly one transition, emits the events that transition
//! produced, and wakes the background session loop so queued frames reach
//! the transport. The loop owns the transport: it connects through a
//! [`Connector`], logs in, reconnects with exponential backoff after a link
//! loss, and bounds every resync with a deadline.
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WebSocketConnector::new("wss://xiangqi.example.org/table");
//! let (session, mut events) = SessionController::new(connector, SessionConfig::new("1.0"));
//!
//! session.login("alice", "hunter2")?;
//! session.connect();
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::LoginSucceeded { .. } => session.join_table(None)?,
//!         SessionEvent::MoveApplied { record, remote: true } => { /* … */ }
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::board::Position;
use crate::clock::TimeControl;
use crate::error::{Result, SessionError};
use crate::event::{ChatMessage, SessionEvent};
use crate::protocol::{ClientFrame, ClientMessage, PlayerId, ServerFrame, TableId};
use crate::referee::{GameStatus, MoveAccepted};
use crate::table::{ConnectionState, Credentials, LinkLoss, TableState, TableView};
use crate::transport::{Connector, Transport};

const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RESYNC_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(8);
const DEFAULT_OUTBOX_CAPACITY: usize = 4;
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`SessionController`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use xiangqi_session::controller::SessionConfig;
///
/// let config = SessionConfig::new("2.1.0")
///     .with_max_reconnect_attempts(3)
///     .with_resync_timeout(Duration::from_secs(5));
/// assert_eq!(config.client_version.as_deref(), Some("2.1.0"));
/// assert_eq!(config.max_reconnect_attempts, 3);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sent with every login.
    pub client_version: Option<String>,
    /// Capacity of the bounded event channel.
    ///
    /// When the UI falls behind, events are dropped with a warning. The
    /// final `Disconnected` event is always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`SessionController::disconnect`] waits for the session loop
    /// before aborting it. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Bound on a single connection attempt. Defaults to **10 seconds**.
    pub connect_timeout: Duration,
    /// Bound on waiting for a requested snapshot. Defaults to **10 seconds**.
    pub resync_timeout: Duration,
    /// Reconnection attempts before giving up. Defaults to **5**.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt; doubled per attempt.
    /// Defaults to **500 ms**.
    pub reconnect_backoff: Duration,
    /// Upper bound of the reconnection delay. Defaults to **8 seconds**.
    pub max_reconnect_backoff: Duration,
    /// Moves that may wait for the server at once.
    ///
    /// Defaults to **4**. Values below 1 are clamped to 1.
    pub outbox_capacity: usize,
    /// Period of the clock driver. Defaults to **100 ms**.
    pub tick_interval: Duration,
    /// Time control for new games.
    pub time_control: TimeControl,
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new(client_version: impl Into<String>) -> Self {
        Self {
            client_version: Some(client_version.into()),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            resync_timeout: DEFAULT_RESYNC_TIMEOUT,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            max_reconnect_backoff: DEFAULT_MAX_RECONNECT_BACKOFF,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            tick_interval: DEFAULT_TICK_INTERVAL,
            time_control: TimeControl::default(),
        }
    }

    /// Set the capacity of the bounded event channel. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful shutdown timeout. Zero aborts the loop immediately.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_resync_timeout(mut self, timeout: Duration) -> Self {
        self.resync_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the base and the cap of the reconnection delay.
    #[must_use]
    pub fn with_reconnect_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_backoff = base;
        self.max_reconnect_backoff = max.max(base);
        self
    }

    /// Set the outbox capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    #[must_use]
    pub fn with_time_control(mut self, time_control: TimeControl) -> Self {
        self.time_control = time_control;
        self
    }

    /// Delay before reconnection attempt `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.reconnect_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_reconnect_backoff)
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the controller handle, the session loop and the
/// clock driver.
struct Shared {
    table: Mutex<TableState>,
    events: mpsc::Sender<SessionEvent>,
    /// Signalled when a transition queued frames for the transport.
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one transition and publish its events before releasing the lock,
    /// so the channel order equals the transition order.
    fn with_table<R>(&self, f: impl FnOnce(&mut TableState) -> R) -> R {
        let mut table = self.lock();
        let out = f(&mut table);
        for event in table.take_events() {
            emit_event(&self.events, event);
        }
        out
    }

    fn read<R>(&self, f: impl FnOnce(&TableState) -> R) -> R {
        f(&self.lock())
    }
}

fn lock_slot<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LoopHandle {
    task: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

// ── Controller handle ───────────────────────────────────────────────

/// Handle to one client session.
///
/// Created with [`SessionController::new`], which returns the handle and the
/// event receiver. Nothing touches the network until
/// [`connect`](Self::connect).
pub struct SessionController {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    session: Mutex<Option<LoopHandle>>,
    clock_driver: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    /// Create a disconnected session.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn new(
        connector: impl Connector,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let table = TableState::new(
            config.outbox_capacity,
            config.time_control,
            config.client_version.clone(),
        );
        let shared = Arc::new(Shared {
            table: Mutex::new(table),
            events: event_tx,
            wake: Notify::new(),
        });
        let controller = Self {
            shared,
            connector: Arc::new(connector),
            config,
            session: Mutex::new(None),
            clock_driver: Mutex::new(None),
        };
        (controller, event_rx)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── Connection ──────────────────────────────────────────────────

    /// Start connecting in the background. Does nothing unless the session
    /// is disconnected.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        if !self.shared.with_table(TableState::begin_connect) {
            debug!("connect ignored, session is not disconnected");
            return;
        }
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(session_loop(
            Arc::clone(&self.connector),
            Arc::clone(&self.shared),
            self.config.clone(),
            shutdown_rx,
        ));
        // A previous loop that already gave up is left to finish on its own.
        *lock_slot(&self.session) = Some(LoopHandle { task, shutdown_tx });
    }

    /// Stop the session loop and go offline. Cancels any reconnection in
    /// progress, stops the clocks and abandons moves waiting for the server.
    pub async fn disconnect(&self) {
        debug!("SessionController: disconnect requested");
        let handle = lock_slot(&self.session).take();
        if let Some(LoopHandle {
            mut task,
            shutdown_tx,
        }) = handle
        {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                    self.shared.with_table(TableState::go_offline);
                    emit_disconnected(&self.shared.events, Some("session aborted".into())).await;
                }
            }
        }
        self.shared.with_table(TableState::go_offline);
    }

    /// Send a logout, then [`disconnect`](Self::disconnect).
    pub async fn logout(&self) {
        info!("logging out");
        self.shared.with_table(TableState::queue_logout);
        self.disconnect().await;
    }

    // ── Credentials ─────────────────────────────────────────────────

    /// Store the identity used for the next login without sending anything.
    ///
    /// # Errors
    ///
    /// [`SessionError::AuthConflict`] while a login is confirmed.
    pub fn set_login_info(&self, credentials: Credentials) -> Result<()> {
        self.shared.with_table(|t| t.set_credentials(credentials))
    }

    /// Store the identity and log in right away if the link is up. Otherwise
    /// the login goes out as soon as a connection is made.
    ///
    /// # Errors
    ///
    /// [`SessionError::AuthConflict`] while a login is confirmed.
    pub fn login(&self, player_id: impl Into<PlayerId>, secret: impl Into<String>) -> Result<()> {
        let credentials = Credentials::new(player_id, secret);
        self.shared.with_table(|t| {
            t.set_credentials(credentials)?;
            t.queue_login();
            Ok::<_, SessionError>(())
        })?;
        self.shared.wake.notify_one();
        Ok(())
    }

    // ── Table operations ────────────────────────────────────────────

    /// Join a table as a player. `None` asks the server to pick one.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotAuthenticated`] unless logged in.
    pub fn join_table(&self, table_id: Option<TableId>) -> Result<()> {
        self.transition(|t| t.join_table(table_id, false))
    }

    /// Join a table as an observer.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotAuthenticated`] unless logged in.
    pub fn join_as_observer(&self, table_id: TableId) -> Result<()> {
        self.transition(|t| t.join_table(Some(table_id), true))
    }

    /// Leave the active table.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoActiveTable`] if not at a table.
    pub fn leave_table(&self) -> Result<()> {
        self.transition(TableState::leave_table)
    }

    /// Start an offline game on this device with fresh clocks.
    pub fn start_local_game(&self) {
        self.shared.with_table(TableState::start_local_game);
    }

    /// Submit a move made on this device.
    ///
    /// The referee's verdict is immediate. At a networked table delivery is
    /// reported later through [`SessionEvent::MoveDelivery`].
    ///
    /// # Errors
    ///
    /// See [`TableState::submit_local_move`].
    pub fn submit_move(&self, from: Position, to: Position) -> Result<MoveAccepted> {
        self.transition(|t| t.submit_local_move(from, to))
    }

    /// Send a chat line to the active table.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoActiveTable`] without one,
    /// [`SessionError::NotConnected`] while offline.
    pub fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.transition(|t| {
            if t.active_table_id().is_none() {
                return Err(SessionError::NoActiveTable);
            }
            t.queue(ClientMessage::Chat { text })
        })
    }

    /// Resign the current game.
    ///
    /// # Errors
    ///
    /// See [`TableState::resign`].
    pub fn resign(&self) -> Result<()> {
        self.transition(TableState::resign)
    }

    /// Offer a draw at the active table.
    ///
    /// # Errors
    ///
    /// See [`TableState::offer_draw`].
    pub fn offer_draw(&self) -> Result<()> {
        self.transition(TableState::offer_draw)
    }

    /// Send a heartbeat ping.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotConnected`] while offline.
    pub fn ping(&self) -> Result<()> {
        self.transition(|t| t.queue(ClientMessage::Ping))
    }

    /// Chat lines received since the last call.
    pub fn drain_new_messages(&self) -> Vec<ChatMessage> {
        self.shared.with_table(TableState::drain_chat)
    }

    // ── Clocks ──────────────────────────────────────────────────────

    /// Advance the running clock by `elapsed`.
    pub fn tick(&self, elapsed: Duration) {
        self.shared.with_table(|t| t.tick(elapsed));
    }

    /// Spawn a task that advances the clocks every
    /// [`tick_interval`](SessionConfig::tick_interval). Replaces any driver
    /// already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_clock_driver(&self) {
        let shared = Arc::clone(&self.shared);
        let period = self.config.tick_interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last = interval.tick().await;
            loop {
                let now = interval.tick().await;
                shared.with_table(|t| t.tick(now.duration_since(last)));
                last = now;
            }
        });
        if let Some(old) = lock_slot(&self.clock_driver).replace(task) {
            old.abort();
        }
    }

    pub fn stop_clock_driver(&self) {
        if let Some(task) = lock_slot(&self.clock_driver).take() {
            task.abort();
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.read(TableState::connection)
    }

    /// `true` while Connected or Authenticated.
    pub fn is_online(&self) -> bool {
        self.shared.read(TableState::is_online)
    }

    pub fn is_login_confirmed(&self) -> bool {
        self.shared.read(TableState::is_login_confirmed)
    }

    pub fn is_game_over(&self) -> bool {
        self.shared.read(TableState::is_game_over)
    }

    pub fn game_status(&self) -> GameStatus {
        self.shared.read(TableState::game_status)
    }

    pub fn active_table_id(&self) -> Option<TableId> {
        self.shared.read(|t| t.active_table_id().map(str::to_owned))
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.shared.read(|t| t.player_id().map(str::to_owned))
    }

    /// Read-only copy of the whole session state.
    pub fn table_view(&self) -> TableView {
        self.shared.read(TableState::table_view)
    }

    /// Run `f` against the current state under the lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&TableState) -> R) -> R {
        self.shared.read(f)
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Run a transition, then wake the loop to flush whatever it queued.
    fn transition<R>(&self, f: impl FnOnce(&mut TableState) -> Result<R>) -> Result<R> {
        let out = self.shared.with_table(f)?;
        self.shared.wake.notify_one();
        Ok(out)
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("connection", &self.connection_state())
            .field("login_confirmed", &self.is_login_confirmed())
            .field("has_task", &lock_slot(&self.session).is_some())
            .finish()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // No executor here to drive a graceful close; abort instead.
        if let Some(handle) = lock_slot(&self.session).take() {
            handle.task.abort();
        }
        if let Some(task) = lock_slot(&self.clock_driver).take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// How one connection ended.
#[derive(Debug)]
enum LinkOutcome {
    /// Local shutdown request.
    Shutdown,
    /// The link failed; reconnection may follow.
    Lost(SessionError),
    /// The server told us to go, or refused our login on reconnect.
    Closed(String),
    /// A requested snapshot never arrived.
    ResyncTimedOut,
}

const SHUTDOWN_REASON: &str = "session closed";

/// Connect, run the connection, reconnect with backoff, and finally emit
/// `Disconnected`.
async fn session_loop(
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    config: SessionConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("session loop started");
    let mut attempt: u32 = 0;

    let reason = loop {
        let connected = tokio::select! {
            _ = &mut shutdown_rx => {
                shared.with_table(TableState::go_offline);
                break SHUTDOWN_REASON.to_owned();
            }
            result = tokio::time::timeout(config.connect_timeout, connector.connect()) => result,
        };

        let failure = match connected {
            Ok(Ok(transport)) => {
                info!(attempt, "transport connected");
                shared.with_table(TableState::transport_up);
                match run_connection(transport, &shared, &config, &mut shutdown_rx).await {
                    LinkOutcome::Shutdown => {
                        shared.with_table(TableState::go_offline);
                        break SHUTDOWN_REASON.to_owned();
                    }
                    LinkOutcome::Closed(reason) => {
                        info!(reason, "connection closed, not reconnecting");
                        shared.with_table(TableState::go_offline);
                        break reason;
                    }
                    LinkOutcome::ResyncTimedOut => {
                        let failure = SessionError::ConnectivityFailure(format!(
                            "no snapshot within {:?}",
                            config.resync_timeout
                        ));
                        break give_up(&shared, &failure);
                    }
                    LinkOutcome::Lost(e) => e,
                }
            }
            Ok(Err(e)) => e,
            Err(_) => SessionError::Timeout,
        };

        match shared.with_table(|t| t.transport_lost(&failure.to_string())) {
            LinkLoss::Offline => break give_up(&shared, &failure),
            LinkLoss::Reconnect { fresh } => {
                if fresh {
                    attempt = 0;
                }
                attempt += 1;
                if attempt > config.max_reconnect_attempts {
                    let failure = SessionError::ConnectivityFailure(format!(
                        "gave up after {} reconnection attempts: {failure}",
                        config.max_reconnect_attempts
                    ));
                    break give_up(&shared, &failure);
                }
                let delay = config.backoff_for(attempt);
                warn!(attempt, ?delay, reason = %failure, "reconnecting");
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        shared.with_table(TableState::go_offline);
                        break SHUTDOWN_REASON.to_owned();
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    };

    emit_disconnected(&shared.events, Some(reason)).await;
    debug!("session loop exited");
}

/// Go offline for good, reporting `failure` upward. Returns the reason
/// carried by the final `Disconnected` event.
fn give_up(shared: &Shared, failure: &SessionError) -> String {
    let reason = failure.to_string();
    shared.with_table(|t| t.connectivity_failed(&reason));
    reason
}

/// Drive one live transport until it ends.
async fn run_connection(
    mut transport: Box<dyn Transport>,
    shared: &Shared,
    config: &SessionConfig,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> LinkOutcome {
    let mut resync_deadline: Option<Instant> = None;

    loop {
        let (frames, close) = shared.with_table(|t| (t.take_outbound(), t.take_close_request()));
        if let Err(e) = send_frames(transport.as_mut(), frames).await {
            error!("transport send error: {e}");
            return LinkOutcome::Lost(e);
        }
        if let Some(reason) = close {
            let _ = transport.close().await;
            return LinkOutcome::Closed(reason);
        }

        match (shared.read(TableState::awaiting_snapshot), resync_deadline) {
            (true, None) => resync_deadline = Some(Instant::now() + config.resync_timeout),
            (false, Some(_)) => resync_deadline = None,
            _ => {}
        }

        tokio::select! {
            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                // A queued logout still goes out.
                let frames = shared.with_table(TableState::take_outbound);
                let _ = send_frames(transport.as_mut(), frames).await;
                let _ = transport.close().await;
                return LinkOutcome::Shutdown;
            }

            () = shared.wake.notified() => {}

            () = deadline(resync_deadline) => {
                warn!(timeout = ?config.resync_timeout, "snapshot did not arrive in time");
                let _ = transport.close().await;
                return LinkOutcome::ResyncTimedOut;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match ServerFrame::decode(&text) {
                        Ok(frame) => shared.with_table(|t| t.apply_frame(frame)),
                        Err(e) => warn!("failed to decode server frame: {e}, raw: {text}"),
                    },
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return LinkOutcome::Lost(e);
                    }
                    None => {
                        debug!("transport closed by server");
                        return LinkOutcome::Lost(SessionError::TransportClosed);
                    }
                }
            }
        }
    }
}

async fn send_frames(
    transport: &mut dyn Transport,
    frames: Vec<ClientFrame>,
) -> std::result::Result<(), SessionError> {
    for frame in frames {
        match frame.encode() {
            Ok(json) => {
                debug!(seq = frame.seq, table_id = ?frame.table_id, "sending frame");
                transport.send(json).await?;
            }
            // An unencodable frame is a bug; the link stays up.
            Err(e) => error!("failed to encode client frame: {e}"),
        }
    }
    Ok(())
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Emit an event without blocking. A full channel drops the event with a
/// warning.
fn emit_event(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!("event channel full, dropping event: {dropped:?}");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit [`SessionEvent::Disconnected`]. Waits for capacity: it is the last
/// event of a session loop and is never dropped.
async fn emit_disconnected(event_tx: &mpsc::Sender<SessionEvent>, reason: Option<String>) {
    if event_tx
        .send(SessionEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
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
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl Connector for Unreachable {
        async fn connect(&self) -> std::result::Result<Box<dyn Transport>, SessionError> {
            Err(SessionError::TransportClosed)
        }
    }

    #[test]
    fn config_defaults() {
        let config = SessionConfig::new("1.0");
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.resync_timeout, Duration::from_secs(10));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.outbox_capacity, 4);
        assert_eq!(config.tick_interval, Duration::from_millis(100));
    }

    #[test]
    fn capacities_are_clamped() {
        let config = SessionConfig::new("1.0")
            .with_event_channel_capacity(0)
            .with_outbox_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.outbox_capacity, 1);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let config = SessionConfig::new("1.0")
            .with_reconnect_backoff(Duration::from_millis(500), Duration::from_secs(3));
        assert_eq!(config.backoff_for(1), Duration::from_millis(500));
        assert_eq!(config.backoff_for(2), Duration::from_secs(1));
        assert_eq!(config.backoff_for(3), Duration::from_secs(2));
        assert_eq!(config.backoff_for(4), Duration::from_secs(3));
        assert_eq!(config.backoff_for(60), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn failed_first_connect_goes_offline() {
        let (session, mut events) = SessionController::new(Unreachable, SessionConfig::new("1.0"));
        session.connect();

        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let last = matches!(event, SessionEvent::Disconnected { .. });
            seen.push(event);
            if last {
                break;
            }
        }
        assert_eq!(
            seen.first(),
            Some(&SessionEvent::ConnectionChanged {
                state: ConnectionState::Connecting
            })
        );
        assert!(seen
            .iter()
            .any(|e| matches!(e, SessionEvent::ConnectivityLost { .. })));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_twice_is_a_no_op() {
        let (session, _events) = SessionController::new(Unreachable, SessionConfig::new("1.0"));
        assert!(!session.is_online());
        session.connect();
        session.connect();
        assert!(lock_slot(&session.session).is_some());
        session.disconnect().await;
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn offline_operations_are_refused() {
        let (session, _events) = SessionController::new(Unreachable, SessionConfig::new("1.0"));
        assert!(matches!(session.ping(), Err(SessionError::NotConnected)));
        assert!(matches!(
            session.join_table(None),
            Err(SessionError::NotAuthenticated)
        ));
        assert!(matches!(
            session.send_chat("hi"),
            Err(SessionError::NoActiveTable)
        ));
        assert!(session.drain_new_messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clock_driver_runs_the_local_clock() {
        let config = SessionConfig::new("1.0")
            .with_time_control(TimeControl::new(Duration::from_secs(1), Duration::ZERO));
        let (session, mut events) = SessionController::new(Unreachable, config);
        session.start_local_game();
        session.start_clock_driver();

        loop {
            match events.recv().await {
                Some(SessionEvent::StatusChanged {
                    status: GameStatus::BlackWins,
                }) => break,
                Some(_) => {}
                None => panic!("event channel closed"),
            }
        }
        assert!(session.is_game_over());
        session.stop_clock_driver();
    }
}
