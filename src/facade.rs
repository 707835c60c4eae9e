//! The entry point used by the UI layer.
//!
//! [`SessionFacade`] ties the [`SessionController`], the [`MoveEngine`] and a
//! [`SettingsStore`] together: it remembers account edits, picks the
//! identity for a server login, keeps the engine strength in sync with the
//! settings and plays engine moves through the same path as the player.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::board::Position;
use crate::controller::SessionController;
use crate::engine::{MoveEngine, SearchCanceller, SearchOutcome};
use crate::error::{Result, SessionError};
use crate::protocol::PlayerId;
use crate::referee::{GameStatus, MoveAccepted};
use crate::settings::{SavedAccount, SettingsStore};
use crate::table::{ConnectionState, Credentials, TableState, TableView};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A fresh guest identity of the form `Guest#NNNNN`.
pub fn guest_player_id() -> PlayerId {
    format!("Guest#{:05}", Uuid::new_v4().as_u128() % 100_000)
}

/// UI-facing session object.
///
/// All methods take `&self`, so the facade can be shared behind an `Arc`
/// between the UI thread and async tasks.
pub struct SessionFacade<S: SettingsStore> {
    controller: SessionController,
    engine: Mutex<MoveEngine>,
    settings: Mutex<S>,
    search: Mutex<Option<SearchCanceller>>,
}

impl<S: SettingsStore> SessionFacade<S> {
    /// Wrap `controller`, taking the engine strength from `settings`.
    pub fn new(controller: SessionController, settings: S) -> Self {
        let mut engine = MoveEngine::new();
        let level = settings.ai_level();
        if let Err(e) = engine.configure_strength(level) {
            warn!("stored engine level ignored: {e}");
        }
        Self {
            controller,
            engine: Mutex::new(engine),
            settings: Mutex::new(settings),
            search: Mutex::new(None),
        }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Run `f` against the settings store.
    pub fn with_settings<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut lock(&self.settings))
    }

    // ── Account ─────────────────────────────────────────────────────

    fn ensure_account_editable(&self) -> Result<()> {
        if self.controller.inspect(TableState::credentials_locked) {
            let player_id = self.controller.player_id().unwrap_or_default();
            debug!(%player_id, "account edit ignored while logged in");
            return Err(SessionError::AuthConflict { player_id });
        }
        Ok(())
    }

    /// The user edited the account name.
    ///
    /// # Errors
    ///
    /// [`SessionError::AuthConflict`] while a login is confirmed, including
    /// during reconnection; the stored account is left alone.
    pub fn on_account_pid_changed(&self, player_id: impl Into<PlayerId>) -> Result<()> {
        self.ensure_account_editable()?;
        let player_id = player_id.into();
        let mut settings = lock(&self.settings);
        let secret = settings
            .saved_account()
            .map(|a| a.secret)
            .unwrap_or_default();
        settings.save_account(Some(SavedAccount { player_id, secret }));
        Ok(())
    }

    /// The user edited the account password.
    ///
    /// # Errors
    ///
    /// [`SessionError::AuthConflict`] while a login is confirmed.
    pub fn on_account_password_changed(&self, secret: impl Into<String>) -> Result<()> {
        self.ensure_account_editable()?;
        let secret = secret.into();
        let mut settings = lock(&self.settings);
        let player_id = settings
            .saved_account()
            .map(|a| a.player_id)
            .unwrap_or_default();
        settings.save_account(Some(SavedAccount { player_id, secret }));
        Ok(())
    }

    /// Log in to the server with the saved account, or as a new guest when
    /// account login is off or no account is saved. Connects if needed.
    ///
    /// Returns the identity used.
    ///
    /// # Errors
    ///
    /// [`SessionError::AuthConflict`] while a login is confirmed.
    pub fn login_server(&self) -> Result<PlayerId> {
        let account = {
            let settings = lock(&self.settings);
            settings
                .saved_account()
                .filter(|a| settings.login_with_account() && !a.player_id.is_empty())
        };
        let credentials = match account {
            Some(account) => Credentials::new(account.player_id, account.secret),
            None => Credentials::new(guest_player_id(), ""),
        };
        let player_id = credentials.player_id.clone();
        info!(%player_id, "logging in to server");

        if self.controller.is_online() {
            self.controller.login(credentials.player_id, credentials.secret)?;
        } else {
            self.controller.set_login_info(credentials)?;
            self.controller.connect();
        }
        Ok(player_id)
    }

    /// Cancel any engine search, then log out and disconnect.
    pub async fn logout(&self) {
        self.cancel_search();
        self.controller.logout().await;
    }

    /// Cancel any engine search and drop the connection without logging out.
    pub async fn disconnect(&self) {
        self.cancel_search();
        self.controller.disconnect().await;
    }

    // ── Engine ──────────────────────────────────────────────────────

    pub fn ai_level(&self) -> u8 {
        lock(&self.engine).strength()
    }

    /// Apply and persist a new engine strength.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidStrength`] outside the supported range; the
    /// stored level is unchanged.
    pub fn on_ai_level_changed(&self, level: u8) -> Result<()> {
        lock(&self.engine).configure_strength(level)?;
        lock(&self.settings).set_ai_level(level);
        Ok(())
    }

    /// An engine search started by [`play_engine_move`](Self::play_engine_move)
    /// is still running.
    pub fn is_searching(&self) -> bool {
        lock(&self.search).is_some()
    }

    /// Cancel the engine search in flight, if any.
    pub fn cancel_search(&self) {
        if let Some(canceller) = lock(&self.search).take() {
            debug!("cancelling engine search");
            canceller.cancel();
        }
    }

    /// Let the engine move for the side to move.
    ///
    /// Returns `Ok(None)` when there is nothing to play, the search was
    /// cancelled, or the position changed during the search so that the
    /// referee refuses the engine's choice. No other move is substituted.
    ///
    /// # Errors
    ///
    /// Whatever [`SessionController::submit_move`] refuses for reasons other
    /// than the rules.
    pub async fn play_engine_move(&self) -> Result<Option<MoveAccepted>> {
        let (board, status) = self
            .controller
            .inspect(|t| (t.referee().board().clone(), t.game_status()));
        if status != GameStatus::InProgress {
            return Ok(None);
        }
        let side = board.side_to_move();
        let engine = *lock(&self.engine);

        self.cancel_search();
        let handle = engine.spawn_search(board, side);
        *lock(&self.search) = Some(handle.canceller());
        let outcome = handle.outcome().await;
        lock(&self.search).take();

        let (from, to) = match outcome {
            SearchOutcome::Move { from, to } => (from, to),
            SearchOutcome::NoLegalMove | SearchOutcome::Cancelled => {
                debug!(?outcome, "engine did not move");
                return Ok(None);
            }
        };

        match self.controller.submit_move(from, to) {
            Ok(accepted) => Ok(Some(accepted)),
            Err(SessionError::Rule(violation)) => {
                warn!(%from, %to, %side, "engine move refused by the referee: {violation}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // ── Game ────────────────────────────────────────────────────────

    /// Start a new game on this device, abandoning any search.
    pub fn new_local_game(&self) {
        self.cancel_search();
        self.controller.start_local_game();
    }

    /// Submit a move made by the local player.
    ///
    /// # Errors
    ///
    /// See [`SessionController::submit_move`].
    pub fn submit_move(&self, from: Position, to: Position) -> Result<MoveAccepted> {
        self.controller.submit_move(from, to)
    }

    /// `true` once a game has started and at least one move was made.
    pub fn is_game_in_progress(&self) -> bool {
        self.controller
            .inspect(|t| !t.is_game_over() && t.referee().move_count() > 0)
    }

    pub fn is_online_and_login_ok(&self) -> bool {
        self.controller
            .inspect(|t| t.is_online() && t.is_login_confirmed())
    }

    pub fn game_status(&self) -> GameStatus {
        self.controller.game_status()
    }

    pub fn is_game_over(&self) -> bool {
        self.controller.is_game_over()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.controller.connection_state()
    }

    pub fn table_view(&self) -> TableView {
        self.controller.table_view()
    }
}

impl<S: SettingsStore> std::fmt::Debug for SessionFacade<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFacade")
            .field("controller", &self.controller)
            .field("ai_level", &self.ai_level())
            .field("searching", &self.is_searching())
            .finish()
    }
}

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
    use crate::controller::SessionConfig;
    use crate::engine::{DEFAULT_STRENGTH, MAX_STRENGTH};
    use crate::settings::MemorySettings;
    use crate::transport::{Connector, Transport};
    use async_trait::async_trait;

    struct Nowhere;

    #[async_trait]
    impl Connector for Nowhere {
        async fn connect(&self) -> std::result::Result<Box<dyn Transport>, SessionError> {
            Err(SessionError::TransportClosed)
        }
    }

    fn facade(settings: MemorySettings) -> SessionFacade<MemorySettings> {
        let (controller, _events) = SessionController::new(Nowhere, SessionConfig::new("test"));
        SessionFacade::new(controller, settings)
    }

    #[test]
    fn guest_ids_have_five_digits() {
        let id = guest_player_id();
        let digits = id.strip_prefix("Guest#").unwrap();
        assert_eq!(digits.len(), 5);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn engine_level_comes_from_settings() {
        let mut settings = MemorySettings::new();
        settings.set_ai_level(5);
        assert_eq!(facade(settings).ai_level(), 5);

        let mut broken = MemorySettings::new();
        broken.set_ai_level(0);
        assert_eq!(facade(broken).ai_level(), DEFAULT_STRENGTH);
    }

    #[test]
    fn ai_level_change_is_persisted() {
        let f = facade(MemorySettings::new());
        f.on_ai_level_changed(MAX_STRENGTH).unwrap();
        assert_eq!(f.ai_level(), MAX_STRENGTH);
        assert_eq!(f.with_settings(|s| s.ai_level()), MAX_STRENGTH);

        assert!(matches!(
            f.on_ai_level_changed(MAX_STRENGTH + 1),
            Err(SessionError::InvalidStrength { .. })
        ));
        assert_eq!(f.with_settings(|s| s.ai_level()), MAX_STRENGTH);
    }

    #[test]
    fn account_edits_are_stored_while_offline() {
        let f = facade(MemorySettings::new());
        f.on_account_pid_changed("alice").unwrap();
        f.on_account_password_changed("pw").unwrap();
        let saved = f.with_settings(|s| s.saved_account()).unwrap();
        assert_eq!(saved, SavedAccount::new("alice", "pw"));
    }

    #[test]
    fn local_game_progress() {
        let f = facade(MemorySettings::new());
        assert!(!f.is_game_in_progress());
        f.new_local_game();
        assert_eq!(f.game_status(), GameStatus::InProgress);
        assert!(!f.is_game_in_progress());

        let from = Position::new(1, 2).unwrap();
        let to = Position::new(4, 2).unwrap();
        f.submit_move(from, to).unwrap();
        assert!(f.is_game_in_progress());
    }

    #[tokio::test]
    async fn engine_replies_for_black() {
        let f = facade(MemorySettings::new());
        f.on_ai_level_changed(1).unwrap();
        f.new_local_game();
        f.submit_move(Position::new(7, 2).unwrap(), Position::new(4, 2).unwrap())
            .unwrap();

        let reply = f.play_engine_move().await.unwrap().unwrap();
        assert_eq!(reply.record.side, crate::board::Side::Black);
        assert_eq!(reply.record.number, 2);
        assert_eq!(f.table_view().move_count, 2);
    }

    #[tokio::test]
    async fn disconnect_cancels_the_search() {
        let f = facade(MemorySettings::new());
        f.on_ai_level_changed(MAX_STRENGTH).unwrap();
        f.new_local_game();

        let (played, ()) = tokio::join!(f.play_engine_move(), async {
            while !f.is_searching() {
                tokio::task::yield_now().await;
            }
            f.disconnect().await;
        });
        assert!(played.unwrap().is_none());
        assert!(!f.is_searching());
        assert_eq!(f.table_view().move_count, 0);
    }

    #[tokio::test]
    async fn engine_does_not_move_before_a_game() {
        let f = facade(MemorySettings::new());
        assert!(f.play_engine_move().await.unwrap().is_none());
        f.cancel_search();
    }
}
