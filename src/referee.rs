//! The game-rules state machine.
//!
//! [`Referee`] owns the board, the move counter and the game status. It is
//! the only writer of [`GameStatus`]; everything else reads it. There is no
//! I/O here and every call returns an explicit result.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::board::{Board, Piece, Position, Side};
use crate::error::RuleViolation;
use crate::rules;

/// Plies without a capture after which the game is drawn.
pub const QUIET_PLY_LIMIT: u32 = 120;

/// Occurrences of the same position that end the game.
const REPETITION_LIMIT: usize = 3;

// ── Status ──────────────────────────────────────────────────────────

/// Game status. Advances `NotStarted → InProgress → terminal` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    #[default]
    NotStarted,
    InProgress,
    RedWins,
    BlackWins,
    Draw,
}

impl GameStatus {
    /// Whether the game has finished.
    pub fn is_over(self) -> bool {
        self.stage() == 2
    }

    fn stage(self) -> u8 {
        match self {
            GameStatus::NotStarted => 0,
            GameStatus::InProgress => 1,
            GameStatus::RedWins | GameStatus::BlackWins | GameStatus::Draw => 2,
        }
    }

    /// The winning side, if the game was won.
    pub fn winner(self) -> Option<Side> {
        match self {
            GameStatus::RedWins => Some(Side::Red),
            GameStatus::BlackWins => Some(Side::Black),
            _ => None,
        }
    }

    /// The status in which `side` has won.
    pub fn win_for(side: Side) -> Self {
        match side {
            Side::Red => GameStatus::RedWins,
            Side::Black => GameStatus::BlackWins,
        }
    }
}

// ── Moves ───────────────────────────────────────────────────────────

/// A move accepted by the referee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRecord {
    pub from: Position,
    pub to: Position,
    pub side: Side,
    /// 1-based position of the move in the game.
    pub number: u32,
    pub captured: Option<Piece>,
}

/// The referee's verdict on an accepted move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveAccepted {
    pub record: MoveRecord,
    /// Status after the move.
    pub status: GameStatus,
    /// Whether the move attacks the opponent's general.
    pub gives_check: bool,
}

/// Result of trying a move without committing it.
struct Probe {
    next: Board,
    captured: Option<Piece>,
    gives_check: bool,
    key: u64,
    /// Occurrences of the resulting position, this one included.
    occurrences: usize,
}

fn position_key(board: &Board) -> u64 {
    let mut hasher = DefaultHasher::new();
    board.hash(&mut hasher);
    hasher.finish()
}

// ── Referee ─────────────────────────────────────────────────────────

/// Validates moves, counts them and derives the game status.
#[derive(Debug, Clone)]
pub struct Referee {
    board: Board,
    status: GameStatus,
    move_count: u32,
    moves: Vec<MoveRecord>,
    /// `positions[k]` is the position after `k` plies.
    positions: Vec<u64>,
    /// `checks[k]` is whether ply `k + 1` gave check.
    checks: Vec<bool>,
    quiet_plies: u32,
}

impl Default for Referee {
    fn default() -> Self {
        Self::new()
    }
}

impl Referee {
    /// A referee holding the starting position with status `NotStarted`.
    pub fn new() -> Self {
        let board = Board::initial();
        Self {
            positions: vec![position_key(&board)],
            board,
            status: GameStatus::NotStarted,
            move_count: 0,
            moves: Vec::new(),
            checks: Vec::new(),
            quiet_plies: 0,
        }
    }

    /// Restore the starting position, status `NotStarted` and zero moves.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn side_to_move(&self) -> Side {
        self.board.side_to_move()
    }

    /// Number of accepted moves since the last reset or snapshot.
    pub fn move_count(&self) -> u32 {
        self.move_count
    }

    /// Moves accepted since the last reset or snapshot, oldest first.
    pub fn moves(&self) -> &[MoveRecord] {
        &self.moves
    }

    pub fn last_move(&self) -> Option<&MoveRecord> {
        self.moves.last()
    }

    pub fn is_in_check(&self, side: Side) -> bool {
        rules::in_check(&self.board, side)
    }

    /// Move from `NotStarted` to `InProgress`. No effect in any other status.
    pub fn start_game(&mut self) {
        if self.status == GameStatus::NotStarted {
            self.set_status(GameStatus::InProgress);
        }
    }

    /// Validate a move for the side to move and apply it if legal.
    ///
    /// A move in a `NotStarted` game starts it.
    ///
    /// # Errors
    ///
    /// Returns the [`RuleViolation`] that makes the move illegal. The board
    /// is left untouched.
    pub fn validate_move(
        &mut self,
        from: Position,
        to: Position,
    ) -> Result<MoveAccepted, RuleViolation> {
        let probe = self.probe(from, to)?;
        let side = self.board.side_to_move();
        let number = self
            .move_count
            .checked_add(1)
            .ok_or(RuleViolation::MoveLimit)?;

        self.board = probe.next;
        self.move_count = number;
        self.quiet_plies = if probe.captured.is_some() {
            0
        } else {
            self.quiet_plies + 1
        };
        self.positions.push(probe.key);
        self.checks.push(probe.gives_check);

        let record = MoveRecord {
            from,
            to,
            side,
            number,
            captured: probe.captured,
        };
        self.moves.push(record);

        let next = if !rules::has_legal_move(&self.board) {
            GameStatus::win_for(side)
        } else if probe.occurrences >= REPETITION_LIMIT
            || self.quiet_plies >= QUIET_PLY_LIMIT
            || rules::insufficient_material(&self.board)
        {
            GameStatus::Draw
        } else {
            GameStatus::InProgress
        };
        self.set_status(next);

        Ok(MoveAccepted {
            record,
            status: self.status,
            gives_check: probe.gives_check,
        })
    }

    /// Every move the side to move may legally play, repetition rules included.
    pub fn legal_moves(&self) -> Vec<(Position, Position)> {
        if self.status.is_over() {
            return Vec::new();
        }
        rules::legal_moves(&self.board)
            .into_iter()
            .filter(|&(from, to)| self.probe(from, to).is_ok())
            .collect()
    }

    /// End the game for a reason outside the board (timeout, resignation,
    /// agreed draw or a server verdict).
    ///
    /// Returns `false` if the game was already over or `status` is not terminal.
    pub fn conclude(&mut self, status: GameStatus) -> bool {
        if !status.is_over() || self.status.is_over() {
            return false;
        }
        self.set_status(status);
        true
    }

    /// Replace the whole game state with an authoritative one.
    ///
    /// Move history is cleared; repetition tracking restarts from `board`.
    pub fn load_snapshot(&mut self, board: Board, move_count: u32, status: GameStatus) {
        debug!(move_count, ?status, "referee state replaced from snapshot");
        self.positions = vec![position_key(&board)];
        self.board = board;
        self.move_count = move_count;
        self.status = status;
        self.moves.clear();
        self.checks.clear();
        self.quiet_plies = 0;
    }

    fn probe(&self, from: Position, to: Position) -> Result<Probe, RuleViolation> {
        if self.status.is_over() {
            return Err(RuleViolation::GameOver);
        }
        rules::check_move(&self.board, from, to)?;

        let mover = self.board.side_to_move();
        let mut next = self.board.clone();
        let captured = next.apply(from, to);
        let gives_check = rules::in_check(&next, mover.opponent());
        let key = position_key(&next);

        let first = self.positions.iter().position(|&k| k == key);
        let occurrences = 1 + self.positions.iter().filter(|&&k| k == key).count();

        if let Some(first) = first {
            if occurrences >= REPETITION_LIMIT && gives_check {
                let checked_throughout = self
                    .moves
                    .iter()
                    .zip(&self.checks)
                    .skip(first)
                    .filter(|(record, _)| record.side == mover)
                    .all(|(_, &check)| check);
                if checked_throughout {
                    return Err(RuleViolation::PerpetualCheck);
                }
            }
        }

        Ok(Probe {
            next,
            captured,
            gives_check,
            key,
            occurrences,
        })
    }

    fn set_status(&mut self, next: GameStatus) {
        if next.stage() < self.status.stage() || next == self.status {
            return;
        }
        debug!(from = ?self.status, to = ?next, move_count = self.move_count, "game status changed");
        self.status = next;
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

    fn pos(file: u8, rank: u8) -> Position {
        Position::new(file, rank).unwrap()
    }

    fn referee_at(fen: &str) -> Referee {
        let mut referee = Referee::new();
        referee.load_snapshot(Board::from_fen(fen).unwrap(), 0, GameStatus::InProgress);
        referee
    }

    const OPENING: [((u8, u8), (u8, u8)); 4] = [
        ((1, 2), (4, 2)), // cannon to the centre
        ((7, 9), (6, 7)), // black horse out
        ((7, 0), (6, 2)), // red horse out
        ((8, 9), (7, 9)), // black chariot along the back rank
    ];

    #[test]
    fn new_referee_is_not_started() {
        let referee = Referee::new();
        assert_eq!(referee.status(), GameStatus::NotStarted);
        assert_eq!(referee.move_count(), 0);
        assert_eq!(referee.side_to_move(), Side::Red);
        assert_eq!(referee.legal_moves().len(), 44);
    }

    #[test]
    fn move_count_tracks_accepted_moves_only() {
        let mut referee = Referee::new();
        for (i, ((ff, fr), (tf, tr))) in OPENING.into_iter().enumerate() {
            // An out-of-turn attempt in between never counts.
            let wrong = if referee.side_to_move() == Side::Red {
                (pos(0, 6), pos(0, 5))
            } else {
                (pos(0, 3), pos(0, 4))
            };
            assert!(referee.validate_move(wrong.0, wrong.1).is_err());

            let accepted = referee.validate_move(pos(ff, fr), pos(tf, tr)).unwrap();
            assert_eq!(accepted.record.number as usize, i + 1);
            assert_eq!(referee.move_count() as usize, i + 1);
        }
        assert_eq!(referee.status(), GameStatus::InProgress);
        assert_eq!(referee.moves().len(), 4);

        referee.reset();
        assert_eq!(referee.move_count(), 0);
        assert_eq!(referee.status(), GameStatus::NotStarted);
        assert_eq!(referee.board(), &Board::initial());
    }

    #[test]
    fn replaying_moves_is_deterministic() {
        let play = || {
            let mut referee = Referee::new();
            for ((ff, fr), (tf, tr)) in OPENING {
                referee.validate_move(pos(ff, fr), pos(tf, tr)).unwrap();
            }
            (referee.board().to_fen(), referee.status(), referee.move_count())
        };
        assert_eq!(play(), play());
    }

    #[test]
    fn rejected_move_leaves_board_untouched() {
        let mut referee = Referee::new();
        let before = referee.board().clone();
        assert_eq!(
            referee.validate_move(pos(0, 0), pos(1, 1)),
            Err(RuleViolation::IllegalPieceMove)
        );
        assert_eq!(referee.board(), &before);
        assert_eq!(referee.move_count(), 0);
    }

    #[test]
    fn checkmate_wins_for_the_mover() {
        let mut referee = referee_at("4k4/1R7/R8/9/9/9/9/9/9/3K5 w");
        let accepted = referee.validate_move(pos(0, 7), pos(0, 9)).unwrap();
        assert!(accepted.gives_check);
        assert_eq!(accepted.status, GameStatus::RedWins);
        assert_eq!(
            referee.validate_move(pos(4, 9), pos(4, 8)),
            Err(RuleViolation::GameOver)
        );
        assert!(referee.legal_moves().is_empty());
    }

    #[test]
    fn stalemate_loses_for_the_side_without_moves() {
        let mut referee = referee_at("4k4/9/4P4/9/9/9/9/5R3/R8/5K3 w");
        let accepted = referee.validate_move(pos(0, 1), pos(3, 1)).unwrap();
        assert!(!accepted.gives_check);
        assert_eq!(accepted.status, GameStatus::RedWins);
    }

    #[test]
    fn bare_generals_are_a_draw() {
        let mut referee = referee_at("3k5/9/9/9/9/9/9/9/4p4/4K4 w");
        let accepted = referee.validate_move(pos(4, 0), pos(4, 1)).unwrap();
        assert!(accepted.record.captured.is_some());
        assert_eq!(accepted.status, GameStatus::Draw);
    }

    #[test]
    fn quiet_threefold_repetition_is_a_draw() {
        let mut referee = referee_at("9/4k4/9/9/9/9/9/9/9/R2K5 w");
        let cycle = [
            (pos(0, 0), pos(0, 1)),
            (pos(4, 8), pos(4, 9)),
            (pos(0, 1), pos(0, 0)),
            (pos(4, 9), pos(4, 8)),
        ];
        for (from, to) in cycle {
            assert_eq!(referee.validate_move(from, to).unwrap().status, GameStatus::InProgress);
        }
        for (i, (from, to)) in cycle.into_iter().enumerate() {
            let status = referee.validate_move(from, to).unwrap().status;
            if i == 3 {
                assert_eq!(status, GameStatus::Draw);
            } else {
                assert_eq!(status, GameStatus::InProgress);
            }
        }
    }

    #[test]
    fn perpetual_check_is_rejected() {
        let mut referee = referee_at("9/4k4/9/9/9/9/9/9/9/R2K5 w");
        let cycle = [
            (pos(0, 0), pos(0, 8)),
            (pos(4, 8), pos(4, 9)),
            (pos(0, 8), pos(0, 9)),
            (pos(4, 9), pos(4, 8)),
            (pos(0, 9), pos(0, 8)),
            (pos(4, 8), pos(4, 9)),
            (pos(0, 8), pos(0, 9)),
            (pos(4, 9), pos(4, 8)),
        ];
        for (from, to) in cycle {
            referee.validate_move(from, to).unwrap();
        }
        assert_eq!(referee.move_count(), 8);
        assert_eq!(
            referee.validate_move(pos(0, 9), pos(0, 8)),
            Err(RuleViolation::PerpetualCheck)
        );
        assert!(!referee.legal_moves().contains(&(pos(0, 9), pos(0, 8))));
        // A quiet move is still available.
        referee.validate_move(pos(0, 9), pos(1, 9)).unwrap();
        assert_eq!(referee.move_count(), 9);
    }

    #[test]
    fn conclude_only_moves_forward() {
        let mut referee = Referee::new();
        assert!(!referee.conclude(GameStatus::InProgress));
        referee.start_game();
        assert_eq!(referee.status(), GameStatus::InProgress);
        assert!(referee.conclude(GameStatus::BlackWins));
        assert!(!referee.conclude(GameStatus::RedWins));
        assert_eq!(referee.status(), GameStatus::BlackWins);
        referee.start_game();
        assert_eq!(referee.status(), GameStatus::BlackWins);
    }

    #[test]
    fn snapshot_replaces_everything() {
        let mut referee = Referee::new();
        referee.validate_move(pos(1, 2), pos(4, 2)).unwrap();
        let board = Board::from_fen("4k4/9/9/9/9/9/9/9/4R4/3K5 b").unwrap();
        referee.load_snapshot(board.clone(), 8, GameStatus::InProgress);
        assert_eq!(referee.board(), &board);
        assert_eq!(referee.move_count(), 8);
        assert!(referee.moves().is_empty());
        assert!(referee.is_in_check(Side::Black));

        let accepted = referee.validate_move(pos(4, 9), pos(5, 9)).unwrap();
        assert_eq!(accepted.record.number, 9);
    }

    #[test]
    fn exhausted_move_counter_refuses_moves() {
        let mut referee = Referee::new();
        referee.load_snapshot(Board::initial(), u32::MAX, GameStatus::InProgress);
        assert_eq!(
            referee.validate_move(pos(1, 2), pos(4, 2)),
            Err(RuleViolation::MoveLimit)
        );
        assert_eq!(referee.board(), &Board::initial());
        assert_eq!(referee.move_count(), u32::MAX);
    }
}
