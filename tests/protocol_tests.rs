#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire format tests: the exact JSON the client writes and the server
//! fixtures it must accept.

use std::time::Duration;

use serde_json::json;
use xiangqi_session::board::{Board, Position, Side, START_FEN};
use xiangqi_session::error_codes::ErrorCode;
use xiangqi_session::protocol::{
    ClientFrame, ClientMessage, ClockInfo, ServerFrame, ServerMessage, TableDelta, WireMove,
};
use xiangqi_session::referee::GameStatus;

fn pos(file: u8, rank: u8) -> Position {
    Position::new(file, rank).unwrap()
}

fn to_value<T: serde::Serialize>(val: &T) -> serde_json::Value {
    serde_json::to_value(val).expect("serialize")
}

// ════════════════════════════════════════════════════════════════════
// Client frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn login_frame_shape() {
    let frame = ClientFrame {
        table_id: None,
        seq: 1,
        message: ClientMessage::Login {
            player_id: "alice".into(),
            secret: "pw".into(),
            client_version: Some("1.0".into()),
        },
    };
    assert_eq!(
        to_value(&frame),
        json!({
            "seq": 1,
            "message": {
                "op": "login",
                "data": {"player_id": "alice", "secret": "pw", "client_version": "1.0"}
            }
        })
    );
}

#[test]
fn move_frame_shape() {
    let frame = ClientFrame {
        table_id: Some("t42".into()),
        seq: 7,
        message: ClientMessage::Move(WireMove {
            from: pos(1, 2),
            to: pos(4, 2),
            side: Side::Red,
            number: 1,
        }),
    };
    assert_eq!(
        to_value(&frame),
        json!({
            "table_id": "t42",
            "seq": 7,
            "message": {
                "op": "move",
                "data": {"from": [1, 2], "to": [4, 2], "side": "red", "number": 1}
            }
        })
    );
}

#[test]
fn unit_ops_have_no_data() {
    for (message, op) in [
        (ClientMessage::Logout, "logout"),
        (ClientMessage::LeaveTable, "leave_table"),
        (ClientMessage::Resign, "resign"),
        (ClientMessage::OfferDraw, "offer_draw"),
        (ClientMessage::Ping, "ping"),
    ] {
        assert_eq!(to_value(&message), json!({ "op": op }));
    }
}

#[test]
fn join_table_omits_missing_table() {
    let message = ClientMessage::JoinTable {
        table_id: None,
        as_observer: false,
    };
    assert_eq!(
        to_value(&message),
        json!({"op": "join_table", "data": {"as_observer": false}})
    );

    let parsed: ClientMessage =
        serde_json::from_value(json!({"op": "join_table", "data": {"table_id": "t9"}})).unwrap();
    assert_eq!(
        parsed,
        ClientMessage::JoinTable {
            table_id: Some("t9".into()),
            as_observer: false,
        }
    );
}

#[test]
fn chat_shape() {
    assert_eq!(
        to_value(&ClientMessage::Chat { text: "gg".into() }),
        json!({"op": "chat", "data": {"text": "gg"}})
    );
}

// ════════════════════════════════════════════════════════════════════
// Server frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn session_frames_need_no_table_or_seq() {
    let frame: ServerFrame = serde_json::from_value(json!({
        "message": {"op": "login_accepted", "data": {"player_id": "alice"}}
    }))
    .unwrap();
    assert_eq!(
        frame,
        ServerFrame::session(ServerMessage::LoginAccepted {
            player_id: "alice".into(),
            rating: None,
        })
    );
}

#[test]
fn login_rejected_uses_screaming_error_codes() {
    let frame: ServerFrame = serde_json::from_value(json!({
        "message": {
            "op": "login_rejected",
            "data": {"error_code": "ALREADY_LOGGED_IN", "reason": "elsewhere"}
        }
    }))
    .unwrap();
    match frame.message {
        ServerMessage::LoginRejected { error_code, reason } => {
            assert_eq!(error_code, ErrorCode::AlreadyLoggedIn);
            assert!(error_code.is_auth_conflict());
            assert_eq!(reason, "elsewhere");
        }
        other => panic!("expected LoginRejected, got {other:?}"),
    }
}

#[test]
fn snapshot_fixture() {
    let frame: ServerFrame = serde_json::from_value(json!({
        "table_id": "t42",
        "seq": 12,
        "message": {
            "op": "table_snapshot",
            "data": {
                "table_id": "t42",
                "board": START_FEN,
                "move_count": 0,
                "status": "in_progress",
                "red": "alice",
                "black": null,
                "clocks": {"red_ms": 600000, "black_ms": 599000}
            }
        }
    }))
    .unwrap();
    assert_eq!(frame.table_id.as_deref(), Some("t42"));
    assert_eq!(frame.seq, 12);
    match frame.message {
        ServerMessage::TableSnapshot(snapshot) => {
            assert_eq!(snapshot.board, Board::initial());
            assert_eq!(snapshot.status, GameStatus::InProgress);
            assert_eq!(snapshot.red.as_deref(), Some("alice"));
            assert_eq!(snapshot.black, None);
            assert!(snapshot.observers.is_empty());
            assert_eq!(snapshot.clocks.remaining(Side::Black), Duration::from_secs(599));
            assert_eq!(snapshot.last_move, None);
        }
        other => panic!("expected TableSnapshot, got {other:?}"),
    }
}

#[test]
fn move_with_clocks_fixture() {
    let frame: ServerFrame = serde_json::from_value(json!({
        "table_id": "t42",
        "seq": 13,
        "message": {
            "op": "move",
            "data": {
                "played": {"from": [7, 7], "to": [4, 7], "side": "black", "number": 2},
                "clocks": {"red_ms": 590000, "black_ms": 580000}
            }
        }
    }))
    .unwrap();
    assert_eq!(
        frame.message,
        ServerMessage::Move {
            played: WireMove {
                from: pos(7, 7),
                to: pos(4, 7),
                side: Side::Black,
                number: 2,
            },
            clocks: Some(ClockInfo {
                red_ms: 590_000,
                black_ms: 580_000,
            }),
        }
    );
}

#[test]
fn deltas_are_tagged_by_kind() {
    let delta = TableDelta::SeatTaken {
        side: Side::Black,
        player_id: "bob".into(),
    };
    assert_eq!(
        to_value(&ServerMessage::TableDelta(delta)),
        json!({"op": "table_delta", "data": {"kind": "seat_taken", "side": "black", "player_id": "bob"}})
    );

    let ended: TableDelta =
        serde_json::from_value(json!({"kind": "game_ended", "status": "red_wins"})).unwrap();
    assert_eq!(
        ended,
        TableDelta::GameEnded {
            status: GameStatus::RedWins,
            reason: None,
        }
    );
}

#[test]
fn off_board_positions_are_rejected() {
    let result = serde_json::from_value::<WireMove>(json!({
        "from": [9, 0], "to": [8, 0], "side": "red", "number": 1
    }));
    assert!(result.is_err());
}

#[test]
fn malformed_boards_are_rejected() {
    let result = serde_json::from_value::<ServerFrame>(json!({
        "table_id": "t42",
        "seq": 1,
        "message": {
            "op": "table_snapshot",
            "data": {
                "table_id": "t42",
                "board": "not a board",
                "move_count": 0,
                "status": "in_progress",
                "red": null,
                "black": null,
                "clocks": {"red_ms": 0, "black_ms": 0}
            }
        }
    }));
    assert!(result.is_err());
}

#[test]
fn unknown_ops_are_rejected() {
    assert!(serde_json::from_str::<ServerMessage>(r#"{"op":"teleport","data":{}}"#).is_err());
}

#[test]
fn error_code_is_optional() {
    let message: ServerMessage =
        serde_json::from_value(json!({"op": "error", "data": {"message": "oops"}})).unwrap();
    assert_eq!(
        message,
        ServerMessage::Error {
            message: "oops".into(),
            error_code: None,
        }
    );
}
