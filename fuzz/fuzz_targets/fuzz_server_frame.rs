#![no_main]

use libfuzzer_sys::fuzz_target;
use xiangqi_session::protocol::{ServerFrame, ServerMessage};
use xiangqi_session::table::TableState;
use xiangqi_session::{Credentials, TimeControl};

/// A session logged in as `fuzz` and waiting for a table snapshot, so that
/// snapshots, moves and deltas all reach the state machine.
fn joined_session() -> TableState {
    let mut state = TableState::new(4, TimeControl::default(), None);
    let _ = state.set_credentials(Credentials::new("fuzz", ""));
    state.begin_connect();
    state.transport_up();
    state.apply_frame(ServerFrame::session(ServerMessage::LoginAccepted {
        player_id: "fuzz".into(),
        rating: None,
    }));
    let _ = state.join_table(None, false);
    state
}

// One JSON frame per line, applied in order to the same session.
fuzz_target!(|data: &[u8]| {
    let mut state = joined_session();
    for line in data.split(|&b| b == b'\n') {
        let Ok(frame) = serde_json::from_slice::<ServerFrame>(line) else {
            continue;
        };
        state.apply_frame(frame);
        if let Some(&(from, to)) = state.referee().legal_moves().first() {
            let _ = state.submit_local_move(from, to);
        }
        state.tick(std::time::Duration::from_millis(250));
        let _ = state.take_events();
        let _ = state.take_outbound();
        let _ = state.drain_chat();
    }
});
