#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end tests through the UI-facing facade.

mod common;

use std::time::Duration;

use common::*;
use tokio_test::{assert_err, assert_ok};
use xiangqi_session::board::{Board, PieceKind, Side};
use xiangqi_session::engine::{MoveEngine, SearchOutcome, MAX_STRENGTH};
use xiangqi_session::protocol::ClientMessage;
use xiangqi_session::settings::{MemorySettings, SavedAccount, SettingsStore};
use xiangqi_session::{
    ConnectionState, GameStatus, RuleViolation, SessionConfig, SessionController, SessionError,
    SessionEvent, SessionFacade,
};

fn facade(
    connector: &MockConnector,
    settings: MemorySettings,
) -> (
    SessionFacade<MemorySettings>,
    tokio::sync::mpsc::Receiver<SessionEvent>,
) {
    init_tracing();
    let config = SessionConfig::new("test")
        .with_reconnect_backoff(Duration::from_millis(5), Duration::from_millis(20));
    let (controller, events) = SessionController::new(connector.clone(), config);
    (SessionFacade::new(controller, settings), events)
}

#[tokio::test]
async fn local_game_opening_move() {
    let (f, mut events) = facade(&MockConnector::new(), MemorySettings::new());
    f.new_local_game();
    assert_eq!(f.game_status(), GameStatus::InProgress);

    // Black may not open.
    let err = assert_err!(f.submit_move(pos(1, 7), pos(4, 7)));
    assert!(matches!(
        err,
        SessionError::Rule(RuleViolation::NotYourTurn { to_move: Side::Red })
    ));
    assert_eq!(f.table_view().move_count, 0);
    assert!(!f.is_game_in_progress());

    let accepted = assert_ok!(f.submit_move(pos(1, 2), pos(4, 2)));
    assert_eq!(accepted.record.number, 1);
    assert_eq!(accepted.status, GameStatus::InProgress);
    assert!(!accepted.gives_check);

    let view = f.table_view();
    assert_eq!(view.move_count, 1);
    assert_eq!(view.board.side_to_move(), Side::Black);
    assert_eq!(
        view.board.piece_at(pos(4, 2)).map(|p| p.kind),
        Some(PieceKind::Cannon)
    );
    assert!(f.is_game_in_progress());

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::MoveApplied { remote: false, record } if record.number == 1)
    })
    .await;
}

#[tokio::test]
async fn engine_plays_the_reply() {
    let (f, _events) = facade(&MockConnector::new(), MemorySettings::new());
    assert_ok!(f.on_ai_level_changed(2));
    f.new_local_game();
    assert_ok!(f.submit_move(pos(7, 2), pos(4, 2)));

    let reply = assert_ok!(f.play_engine_move().await).expect("engine should move");
    assert_eq!(reply.record.side, Side::Black);
    assert_eq!(f.table_view().move_count, 2);
    assert_eq!(f.table_view().board.side_to_move(), Side::Red);
}

#[tokio::test]
async fn resignation_ends_a_local_game() {
    let (f, _events) = facade(&MockConnector::new(), MemorySettings::new());
    f.new_local_game();
    assert_ok!(f.controller().resign());
    assert_eq!(f.game_status(), GameStatus::BlackWins);
    assert!(f.is_game_over());
    assert!(assert_ok!(f.play_engine_move().await).is_none());
}

#[tokio::test]
async fn guest_login_when_no_account_is_saved() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let (f, _events) = facade(&connector, MemorySettings::new());

    let player_id = assert_ok!(f.login_server());
    assert!(player_id.starts_with("Guest#"));

    let frame = server.expect_frame(is_login).await;
    match frame.message {
        ClientMessage::Login {
            player_id: sent,
            secret,
            ..
        } => {
            assert_eq!(sent, player_id);
            assert_eq!(secret, "");
        }
        other => panic!("expected a login, got {other:?}"),
    }
}

#[tokio::test]
async fn saved_account_login_and_credential_rule() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let settings = MemorySettings::new().with_account(SavedAccount::new("alice", "pw"));
    let (f, mut events) = facade(&connector, settings);

    // Offline edits are stored.
    assert_ok!(f.on_account_password_changed("secret"));
    assert_eq!(assert_ok!(f.login_server()), "alice");
    let frame = server.expect_frame(is_login).await;
    assert_eq!(
        frame.message,
        ClientMessage::Login {
            player_id: "alice".into(),
            secret: "secret".into(),
            client_version: Some("test".into()),
        }
    );

    server.push(&login_accepted("alice"));
    wait_for(&mut events, |e| matches!(e, SessionEvent::LoginSucceeded { .. })).await;
    assert!(f.is_online_and_login_ok());

    // Online with a confirmed login: edits are refused and nothing changes.
    let err = assert_err!(f.on_account_pid_changed("mallory"));
    assert!(matches!(err, SessionError::AuthConflict { .. }));
    assert_err!(f.on_account_password_changed("other"));
    assert_err!(f.login_server());
    assert_eq!(
        f.with_settings(|s| s.saved_account()),
        Some(SavedAccount::new("alice", "secret"))
    );

    f.logout().await;
    server
        .expect_frame(|m| matches!(m, ClientMessage::Logout))
        .await;
    assert_eq!(f.connection_state(), ConnectionState::Disconnected);
    assert!(!f.is_online_and_login_ok());

    // Offline again: edits are accepted.
    assert_ok!(f.on_account_pid_changed("alice2"));
    assert_eq!(
        f.with_settings(|s| s.saved_account()).map(|a| a.player_id),
        Some("alice2".to_owned())
    );
}

#[tokio::test]
async fn credentials_stay_locked_while_reconnecting() {
    let connector = MockConnector::new();
    let mut first = connector.accept();
    let _second = connector.accept();
    let settings = MemorySettings::new().with_account(SavedAccount::new("alice", "pw"));
    let (f, mut events) = facade(&connector, settings);

    assert_ok!(f.login_server());
    first.expect_frame(is_login).await;
    first.push(&login_accepted("alice"));
    wait_for(&mut events, |e| matches!(e, SessionEvent::LoginSucceeded { .. })).await;

    first.hang_up();
    wait_for(&mut events, |e| {
        *e == SessionEvent::ConnectionChanged {
            state: ConnectionState::Reconnecting,
        }
    })
    .await;
    assert!(!f.is_online_and_login_ok());

    // The facade and the controller refuse the same edits.
    let err = assert_err!(f.on_account_pid_changed("mallory"));
    assert!(matches!(err, SessionError::AuthConflict { .. }));
    assert_err!(f.on_account_password_changed("other"));
    assert_err!(f.controller().login("mallory", "other"));
    assert_eq!(
        f.with_settings(|s| s.saved_account()),
        Some(SavedAccount::new("alice", "pw"))
    );
}

#[tokio::test]
async fn logout_cancels_the_engine_search() {
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let (f, mut events) = facade(&connector, MemorySettings::new());
    assert_ok!(f.login_server());
    let login = server.expect_frame(is_login).await;
    let player_id = match login.message {
        ClientMessage::Login { player_id, .. } => player_id,
        other => panic!("expected a login, got {other:?}"),
    };
    server.push(&login_accepted(&player_id));
    wait_for(&mut events, |e| matches!(e, SessionEvent::LoginSucceeded { .. })).await;

    // The strongest level searches for seconds unless stopped.
    assert_ok!(f.on_ai_level_changed(MAX_STRENGTH));
    f.new_local_game();
    let (played, ()) = tokio::join!(f.play_engine_move(), async {
        while !f.is_searching() {
            tokio::task::yield_now().await;
        }
        f.logout().await;
    });

    assert!(assert_ok!(played).is_none());
    assert!(!f.is_searching());
    assert_eq!(f.table_view().move_count, 0);
    server
        .expect_frame(|m| matches!(m, ClientMessage::Logout))
        .await;
    assert_eq!(f.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn refused_engine_move_is_not_replaced() {
    let (f, _events) = facade(&MockConnector::new(), MemorySettings::new());
    assert_ok!(f.on_ai_level_changed(2));

    // Shallow searches finish well inside their budget, so the choice is fixed.
    let mut engine = MoveEngine::new();
    assert_ok!(engine.configure_strength(2));
    let (from, to) = match engine.select_move(&Board::initial(), Side::Red) {
        SearchOutcome::Move { from, to } => (from, to),
        other => panic!("expected an opening move, got {other:?}"),
    };

    f.new_local_game();
    let (played, ()) = tokio::join!(f.play_engine_move(), async {
        while !f.is_searching() {
            tokio::task::yield_now().await;
        }
        // The player makes the engine's move, and Black answers, before the
        // search reports back.
        assert_ok!(f.submit_move(from, to));
        let reply = f
            .controller()
            .inspect(|t| t.referee().legal_moves().first().copied())
            .expect("black has a reply");
        assert_ok!(f.submit_move(reply.0, reply.1));
    });

    assert!(assert_ok!(played).is_none());
    let view = f.table_view();
    assert_eq!(view.move_count, 2);
    assert_eq!(view.board.side_to_move(), Side::Red);
}
