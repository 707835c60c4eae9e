#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Session controller lifecycle tests against an in-memory server.

mod common;

use std::time::Duration;

use common::*;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};
use xiangqi_session::board::{Board, Side};
use xiangqi_session::error_codes::ErrorCode;
use xiangqi_session::event::DeliveryOutcome;
use xiangqi_session::protocol::{ClientMessage, ServerFrame, ServerMessage};
use xiangqi_session::{
    ConnectionState, SessionConfig, SessionController, SessionError, SessionEvent,
};

/// Position after four plies, Red to move.
const FOUR_PLIES: &str = "rnbakabr1/9/1c4nc1/p1p1p1p1p/9/9/P1P1P1P1P/1C2C1N2/9/RNBAKAB1R w";

fn config() -> SessionConfig {
    SessionConfig::new("test")
        .with_reconnect_backoff(Duration::from_millis(5), Duration::from_millis(20))
}

/// Connect and log in as `alice`.
async fn logged_in(
    connector: &MockConnector,
    config: SessionConfig,
) -> (SessionController, mpsc::Receiver<SessionEvent>, MockServer) {
    init_tracing();
    let mut server = connector.accept();
    let (session, mut events) = SessionController::new(connector.clone(), config);
    assert_ok!(session.login("alice", "secret"));
    session.connect();

    server.expect_frame(is_login).await;
    server.push(&login_accepted("alice"));
    wait_for(&mut events, |e| matches!(e, SessionEvent::LoginSucceeded { .. })).await;
    (session, events, server)
}

/// Join [`TABLE`] seated as Red against `bob`.
async fn seated(
    session: &SessionController,
    events: &mut mpsc::Receiver<SessionEvent>,
    server: &mut MockServer,
    board: Board,
    move_count: u32,
) {
    assert_ok!(session.join_table(Some(TABLE.into())));
    server.expect_frame(is_join).await;
    server.push(&snapshot(1, board, move_count, Some("alice"), Some("bob")));
    let joined = wait_for(events, |e| matches!(e, SessionEvent::TableJoined { .. })).await;
    assert_eq!(
        joined,
        SessionEvent::TableJoined {
            table_id: TABLE.into(),
            seat: Some(Side::Red)
        }
    );
}

#[tokio::test]
async fn login_sends_credentials_and_authenticates() {
    init_tracing();
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let (session, mut events) = SessionController::new(connector.clone(), config());
    assert_ok!(session.login("alice", "secret"));
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);

    session.connect();
    let frame = server.next_frame().await;
    assert_eq!(frame.seq, 1);
    assert_eq!(frame.table_id, None);
    assert_eq!(
        frame.message,
        ClientMessage::Login {
            player_id: "alice".into(),
            secret: "secret".into(),
            client_version: Some("test".into()),
        }
    );

    server.push(&login_accepted("alice"));
    let seen = vec![
        next_event(&mut events).await,
        next_event(&mut events).await,
        next_event(&mut events).await,
        next_event(&mut events).await,
    ];
    assert_eq!(
        seen,
        vec![
            SessionEvent::ConnectionChanged {
                state: ConnectionState::Connecting
            },
            SessionEvent::ConnectionChanged {
                state: ConnectionState::Connected
            },
            SessionEvent::LoginSucceeded {
                player_id: "alice".into()
            },
            SessionEvent::ConnectionChanged {
                state: ConnectionState::Authenticated
            },
        ]
    );
    assert!(session.is_online());
    assert!(session.is_login_confirmed());
    assert_eq!(session.player_id().as_deref(), Some("alice"));
}

#[tokio::test]
async fn credentials_are_kept_while_logged_in() {
    let connector = MockConnector::new();
    let (session, _events, _server) = logged_in(&connector, config()).await;

    let err = assert_err!(session.login("mallory", "other"));
    assert!(matches!(err, SessionError::AuthConflict { ref player_id } if player_id == "alice"));
    assert_err!(session.set_login_info(xiangqi_session::Credentials::new("mallory", "x")));

    let stored = session.inspect(|t| t.credentials().map(|c| c.player_id.clone()));
    assert_eq!(stored.as_deref(), Some("alice"));
    assert!(session.is_login_confirmed());
}

#[tokio::test]
async fn rejected_login_reports_auth_conflict() {
    init_tracing();
    let connector = MockConnector::new();
    let mut server = connector.accept();
    let (session, mut events) = SessionController::new(connector.clone(), config());
    assert_ok!(session.login("alice", "secret"));
    session.connect();
    server.expect_frame(is_login).await;

    server.push(&ServerFrame::session(ServerMessage::LoginRejected {
        error_code: ErrorCode::AlreadyLoggedIn,
        reason: "logged in on another device".into(),
    }));
    let failed = wait_for(&mut events, |e| matches!(e, SessionEvent::LoginFailed { .. })).await;
    assert_eq!(
        failed,
        SessionEvent::LoginFailed {
            error_code: ErrorCode::AlreadyLoggedIn,
            reason: "logged in on another device".into(),
            auth_conflict: true,
        }
    );
    assert_eq!(session.connection_state(), ConnectionState::Connected);
    assert!(!session.is_login_confirmed());
    assert!(session.is_online());
}

#[tokio::test]
async fn moves_flow_and_stale_frames_are_dropped() {
    let connector = MockConnector::new();
    let (session, mut events, mut server) = logged_in(&connector, config()).await;
    seated(&session, &mut events, &mut server, Board::initial(), 0).await;

    let accepted = assert_ok!(session.submit_move(pos(1, 2), pos(4, 2)));
    assert_eq!(accepted.record.number, 1);
    let frame = server
        .expect_frame(|m| matches!(m, ClientMessage::Move(_)))
        .await;
    assert_eq!(frame.table_id.as_deref(), Some(TABLE));
    match frame.message {
        ClientMessage::Move(played) => {
            assert_eq!((played.from, played.to, played.number), (pos(1, 2), pos(4, 2), 1));
        }
        other => panic!("expected a move, got {other:?}"),
    }

    // Echo of our own move.
    server.push(&move_frame(2, pos(1, 2), pos(4, 2), Side::Red, 1));
    wait_for(&mut events, |e| {
        *e == SessionEvent::MoveDelivery {
            number: 1,
            outcome: DeliveryOutcome::Acknowledged,
        }
    })
    .await;

    // A replayed sequence number is ignored; the next one applies.
    server.push(&move_frame(2, pos(1, 7), pos(4, 7), Side::Black, 2));
    server.push(&move_frame(3, pos(7, 7), pos(4, 7), Side::Black, 2));
    let applied = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::MoveApplied { remote: true, .. })
    })
    .await;
    match applied {
        SessionEvent::MoveApplied { record, .. } => assert_eq!(record.from, pos(7, 7)),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(session.table_view().move_count, 2);

    // A gap forces a resync.
    server.push(&chat_frame(5, "bob", "skipped ahead"));
    wait_for(&mut events, |e| matches!(e, SessionEvent::ResyncRequested { .. })).await;
    let resync = server.expect_frame(is_join).await;
    assert_eq!(
        resync.message,
        ClientMessage::JoinTable {
            table_id: Some(TABLE.into()),
            as_observer: false,
        }
    );
    assert!(session.drain_new_messages().is_empty());
}

#[tokio::test]
async fn chat_is_buffered_until_drained() {
    let connector = MockConnector::new();
    let (session, mut events, mut server) = logged_in(&connector, config()).await;
    seated(&session, &mut events, &mut server, Board::initial(), 0).await;

    server.push_raw("this is not a frame");
    server.push(&chat_frame(2, "bob", "hello"));
    server.push(&chat_frame(3, "bob", "good luck"));
    wait_for(&mut events, |e| matches!(e, SessionEvent::ChatReceived { .. })).await;
    wait_for(&mut events, |e| matches!(e, SessionEvent::ChatReceived { .. })).await;

    let lines = session.drain_new_messages();
    let texts: Vec<_> = lines.iter().map(|m| (m.order, m.text.as_str())).collect();
    assert_eq!(texts, vec![(1, "hello"), (2, "good luck")]);
    assert!(session.drain_new_messages().is_empty());

    assert_ok!(session.send_chat("thanks"));
    let frame = server
        .expect_frame(|m| matches!(m, ClientMessage::Chat { .. }))
        .await;
    assert_eq!(
        frame.message,
        ClientMessage::Chat {
            text: "thanks".into()
        }
    );
}

#[tokio::test]
async fn observers_cannot_move() {
    let connector = MockConnector::new();
    let (session, mut events, mut server) = logged_in(&connector, config()).await;

    assert_ok!(session.join_as_observer(TABLE.into()));
    let frame = server.expect_frame(is_join).await;
    assert_eq!(
        frame.message,
        ClientMessage::JoinTable {
            table_id: Some(TABLE.into()),
            as_observer: true,
        }
    );
    server.push(&snapshot(1, Board::initial(), 0, Some("bob"), Some("carol")));
    let joined = wait_for(&mut events, |e| matches!(e, SessionEvent::TableJoined { .. })).await;
    assert_eq!(
        joined,
        SessionEvent::TableJoined {
            table_id: TABLE.into(),
            seat: None
        }
    );

    let err = assert_err!(session.submit_move(pos(1, 2), pos(4, 2)));
    assert!(matches!(err, SessionError::NotSeated { side: Side::Red }));
    assert_eq!(session.table_view().move_count, 0);

    assert_ok!(session.leave_table());
    assert_eq!(session.active_table_id(), None);
    server
        .expect_frame(|m| matches!(m, ClientMessage::LeaveTable))
        .await;
}

#[tokio::test]
async fn rejected_move_from_server_triggers_resync() {
    let connector = MockConnector::new();
    let (session, mut events, mut server) = logged_in(&connector, config()).await;
    seated(&session, &mut events, &mut server, Board::initial(), 0).await;

    server.push(&ServerFrame::session(ServerMessage::Error {
        message: "illegal move".into(),
        error_code: Some(ErrorCode::IllegalMove),
    }));
    wait_for(&mut events, |e| matches!(e, SessionEvent::ResyncRequested { .. })).await;
    let error = wait_for(&mut events, |e| matches!(e, SessionEvent::ServerError { .. })).await;
    assert_eq!(
        error,
        SessionEvent::ServerError {
            message: "illegal move".into(),
            error_code: Some(ErrorCode::IllegalMove),
        }
    );
    server.expect_frame(is_join).await;
    assert!(session.inspect(|t| t.awaiting_snapshot()));
}

#[tokio::test]
async fn resync_after_reconnect_discards_stale_move() {
    let connector = MockConnector::new();
    let (session, mut events, mut first) = logged_in(&connector, config()).await;
    let mut second = connector.accept();
    let board = Board::from_fen(FOUR_PLIES).unwrap();
    seated(&session, &mut events, &mut first, board.clone(), 4).await;

    first.hang_up();
    wait_for(&mut events, |e| {
        *e == SessionEvent::ConnectionChanged {
            state: ConnectionState::Reconnecting,
        }
    })
    .await;

    // Made while the link is down: held, not sent.
    let accepted = assert_ok!(session.submit_move(pos(8, 0), pos(8, 1)));
    assert_eq!(accepted.record.number, 5);
    assert_eq!(session.table_view().move_count, 5);
    assert_eq!(session.table_view().pending_moves, 1);

    second.expect_frame(is_login).await;
    second.push(&login_accepted("alice"));
    let resync = second.expect_frame(is_join).await;
    assert_eq!(resync.table_id, None);

    // The table moved on to eight moves without us.
    second.push(&snapshot(1, board.clone(), 8, Some("alice"), Some("bob")));
    wait_for(&mut events, |e| {
        *e == SessionEvent::MoveDelivery {
            number: 5,
            outcome: DeliveryOutcome::Discarded,
        }
    })
    .await;
    let done = wait_for(&mut events, |e| matches!(e, SessionEvent::ResyncCompleted { .. })).await;
    assert_eq!(
        done,
        SessionEvent::ResyncCompleted {
            table_id: TABLE.into(),
            move_count: 8
        }
    );

    let view = session.table_view();
    assert_eq!(view.connection, ConnectionState::Authenticated);
    assert_eq!(view.move_count, 8);
    assert_eq!(view.board, board);
    assert_eq!(view.pending_moves, 0);
    assert!(second
        .written()
        .iter()
        .all(|f| !matches!(f.message, ClientMessage::Move(_))));
}

#[tokio::test]
async fn reconnection_gives_up_after_max_attempts() {
    let connector = MockConnector::new();
    let (session, mut events, server) =
        logged_in(&connector, config().with_max_reconnect_attempts(2)).await;

    server.fail("connection reset");
    let seen = until_disconnected(&mut events).await;

    assert!(seen.contains(&SessionEvent::ConnectionChanged {
        state: ConnectionState::Reconnecting
    }));
    assert!(seen
        .iter()
        .any(|e| matches!(e, SessionEvent::ConnectivityLost { .. })));
    assert!(matches!(
        seen.last(),
        Some(SessionEvent::Disconnected { reason: Some(_) })
    ));
    // The first connection plus two retries.
    assert_eq!(connector.attempts(), 3);
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(!session.is_login_confirmed());
}

#[tokio::test]
async fn disconnect_notice_is_terminal() {
    let connector = MockConnector::new();
    let (session, mut events, server) = logged_in(&connector, config()).await;

    server.push(&ServerFrame::session(ServerMessage::DisconnectNotice {
        reason: "maintenance".into(),
    }));
    let seen = until_disconnected(&mut events).await;

    assert_eq!(
        seen.last(),
        Some(&SessionEvent::Disconnected {
            reason: Some("maintenance".into())
        })
    );
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::ConnectivityLost { .. })));
    assert_eq!(connector.attempts(), 1);
    assert!(server.is_closed());
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn resync_that_never_arrives_drops_the_connection() {
    let connector = MockConnector::new();
    let (session, mut events, mut server) = logged_in(
        &connector,
        config().with_resync_timeout(Duration::from_millis(50)),
    )
    .await;

    assert_ok!(session.join_table(Some(TABLE.into())));
    server.expect_frame(is_join).await;

    let lost = wait_for(&mut events, |e| matches!(e, SessionEvent::ConnectivityLost { .. })).await;
    let expected = SessionError::ConnectivityFailure("no snapshot within 50ms".into());
    assert_eq!(
        lost,
        SessionEvent::ConnectivityLost {
            reason: expected.to_string()
        }
    );
    until_disconnected(&mut events).await;
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn logout_sends_logout_and_closes() {
    let connector = MockConnector::new();
    let (session, mut events, mut server) = logged_in(&connector, config()).await;

    session.logout().await;

    server
        .expect_frame(|m| matches!(m, ClientMessage::Logout))
        .await;
    assert!(server.is_closed());
    let seen = until_disconnected(&mut events).await;
    assert!(seen.contains(&SessionEvent::ConnectionChanged {
        state: ConnectionState::Disconnected
    }));
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(!session.is_login_confirmed());
    assert_err!(session.ping());
}

#[tokio::test]
async fn switching_tables_never_carries_a_move_across() {
    let connector = MockConnector::new();
    let (session, mut events, mut server) = logged_in(&connector, config()).await;
    seated(&session, &mut events, &mut server, Board::initial(), 0).await;

    assert_ok!(session.submit_move(pos(1, 2), pos(4, 2)));
    server
        .expect_frame(|m| matches!(m, ClientMessage::Move(_)))
        .await;

    // Off to another table before the move is echoed.
    assert_ok!(session.join_table(Some("t2".into())));
    wait_for(&mut events, |e| {
        *e == SessionEvent::MoveDelivery {
            number: 1,
            outcome: DeliveryOutcome::Discarded,
        }
    })
    .await;
    server.expect_frame(is_join).await;

    server.push(&snapshot_of("t2", 5, Board::initial(), 0, Some("dave"), Some("alice")));
    let joined = wait_for(&mut events, |e| matches!(e, SessionEvent::TableJoined { .. })).await;
    assert_eq!(
        joined,
        SessionEvent::TableJoined {
            table_id: "t2".into(),
            seat: Some(Side::Black)
        }
    );
    wait_for(&mut events, |e| matches!(e, SessionEvent::ResyncCompleted { .. })).await;

    let view = session.table_view();
    assert_eq!(view.table_id.as_deref(), Some("t2"));
    assert_eq!(view.move_count, 0);
    assert_eq!(view.board, Board::initial());
    assert_eq!(view.pending_moves, 0);
    assert!(server
        .written()
        .iter()
        .all(|f| !matches!(f.message, ClientMessage::Move(_))));
}

#[tokio::test]
async fn join_survives_a_dropped_link() {
    let connector = MockConnector::new();
    let (session, mut events, mut first) = logged_in(&connector, config()).await;
    let mut second = connector.accept();

    assert_ok!(session.join_table(Some(TABLE.into())));
    first.expect_frame(is_join).await;
    first.hang_up();
    wait_for(&mut events, |e| {
        *e == SessionEvent::ConnectionChanged {
            state: ConnectionState::Reconnecting,
        }
    })
    .await;

    second.expect_frame(is_login).await;
    second.push(&login_accepted("alice"));
    let join = second.expect_frame(is_join).await;
    assert_eq!(
        join.message,
        ClientMessage::JoinTable {
            table_id: Some(TABLE.into()),
            as_observer: false,
        }
    );

    second.push(&snapshot(1, Board::initial(), 0, Some("alice"), Some("bob")));
    let joined = wait_for(&mut events, |e| matches!(e, SessionEvent::TableJoined { .. })).await;
    assert_eq!(
        joined,
        SessionEvent::TableJoined {
            table_id: TABLE.into(),
            seat: Some(Side::Red)
        }
    );
    assert_eq!(session.connection_state(), ConnectionState::Authenticated);
    assert!(!session.inspect(|t| t.awaiting_snapshot()));
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_attempt_is_bounded_by_the_timeout() {
    init_tracing();
    let timeout = Duration::from_millis(500);
    let (session, mut events) =
        SessionController::new(StallingConnector, config().with_connect_timeout(timeout));
    let started = tokio::time::Instant::now();
    session.connect();

    let seen = until_disconnected(&mut events).await;
    assert!(started.elapsed() >= timeout);
    assert_eq!(
        seen.first(),
        Some(&SessionEvent::ConnectionChanged {
            state: ConnectionState::Connecting
        })
    );
    assert!(seen.contains(&SessionEvent::ConnectivityLost {
        reason: SessionError::Timeout.to_string()
    }));
    assert_eq!(
        seen.last(),
        Some(&SessionEvent::Disconnected {
            reason: Some(SessionError::Timeout.to_string())
        })
    );
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(!session.is_online());
}
