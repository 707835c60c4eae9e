//! Built-in computer opponent.
//!
//! A small iterative-deepening alpha-beta search over material. Strength
//! levels map to a search depth and a time budget. Searches run on tokio's
//! blocking pool through [`MoveEngine::spawn_search`] and can be cancelled
//! at any point.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::board::{Board, PieceKind, Position, Side};
use crate::error::{Result, SessionError};
use crate::rules;

/// Weakest supported strength level.
pub const MIN_STRENGTH: u8 = 1;
/// Strongest supported strength level.
pub const MAX_STRENGTH: u8 = 6;
/// Strength used until [`MoveEngine::configure_strength`] is called.
pub const DEFAULT_STRENGTH: u8 = 3;

const BASE_BUDGET: Duration = Duration::from_millis(250);
const MATE: i32 = 100_000;
const INFINITY: i32 = 1_000_000;
/// Nodes between checks of the cancel flag and the deadline.
const POLL_INTERVAL: u64 = 1024;

/// What a search produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The chosen move.
    Move { from: Position, to: Position },
    /// The side to move is checkmated or stalemated.
    NoLegalMove,
    /// The search was cancelled before it finished.
    Cancelled,
}

/// Move selection at a configurable strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveEngine {
    strength: u8,
}

impl Default for MoveEngine {
    fn default() -> Self {
        Self {
            strength: DEFAULT_STRENGTH,
        }
    }
}

impl MoveEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the strength level.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidStrength`] if `level` is outside
    /// `MIN_STRENGTH..=MAX_STRENGTH`.
    pub fn configure_strength(&mut self, level: u8) -> Result<()> {
        if !(MIN_STRENGTH..=MAX_STRENGTH).contains(&level) {
            return Err(SessionError::InvalidStrength {
                level,
                min: MIN_STRENGTH,
                max: MAX_STRENGTH,
            });
        }
        self.strength = level;
        Ok(())
    }

    pub fn strength(&self) -> u8 {
        self.strength
    }

    /// Maximum search depth in plies.
    pub fn depth(&self) -> u8 {
        self.strength
    }

    /// Wall-clock budget per search. Doubles with each level.
    pub fn time_budget(&self) -> Duration {
        BASE_BUDGET * (1u32 << self.strength.saturating_sub(1))
    }

    /// Pick a move for `side` on `board`, blocking the current thread.
    pub fn select_move(&self, board: &Board, side: Side) -> SearchOutcome {
        self.select_move_with(board, side, &AtomicBool::new(false))
    }

    /// Like [`select_move`](Self::select_move) but stops early once `cancel`
    /// is set.
    pub fn select_move_with(&self, board: &Board, side: Side, cancel: &AtomicBool) -> SearchOutcome {
        let mut root = board.clone();
        root.set_side_to_move(side);
        let mut search = Search {
            cancel,
            deadline: Instant::now().checked_add(self.time_budget()),
            nodes: 0,
            aborted: false,
        };
        let outcome = search.run(&root, self.depth());
        debug!(strength = self.strength, nodes = search.nodes, ?outcome, "engine search finished");
        outcome
    }

    /// Run a search on the blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_search(&self, board: Board, side: Side) -> SearchHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let engine = *self;
        let task = tokio::task::spawn_blocking(move || engine.select_move_with(&board, side, &flag));
        SearchHandle { cancel, task }
    }
}

// ── Handles ─────────────────────────────────────────────────────────

/// An in-flight search started by [`MoveEngine::spawn_search`].
#[derive(Debug)]
pub struct SearchHandle {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<SearchOutcome>,
}

impl SearchHandle {
    /// Ask the search to stop. Its outcome becomes [`SearchOutcome::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// A cloneable handle that can cancel this search from elsewhere.
    pub fn canceller(&self) -> SearchCanceller {
        SearchCanceller(Arc::clone(&self.cancel))
    }

    /// Wait for the search to finish.
    pub async fn outcome(self) -> SearchOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("engine search task failed: {e}");
                SearchOutcome::Cancelled
            }
        }
    }
}

/// Cancels a search without owning its handle.
#[derive(Debug, Clone)]
pub struct SearchCanceller(Arc<AtomicBool>);

impl SearchCanceller {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ── Search ──────────────────────────────────────────────────────────

struct Search<'a> {
    cancel: &'a AtomicBool,
    deadline: Option<Instant>,
    nodes: u64,
    aborted: bool,
}

impl Search<'_> {
    fn should_stop(&self) -> bool {
        self.cancel.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn run(&mut self, board: &Board, max_depth: u8) -> SearchOutcome {
        if self.cancel.load(Ordering::Relaxed) {
            return SearchOutcome::Cancelled;
        }
        let mut moves = ordered_moves(board);
        let Some(&first) = moves.first() else {
            return SearchOutcome::NoLegalMove;
        };
        let mut best = first;

        for depth in 1..=max_depth {
            let mut alpha = -INFINITY;
            let mut depth_best = None;
            for &(from, to) in &moves {
                let mut next = board.clone();
                next.apply(from, to);
                let Some(score) = self.negamax(&next, depth - 1, -INFINITY, -alpha, 1) else {
                    break;
                };
                let score = -score;
                if score > alpha {
                    alpha = score;
                    depth_best = Some((from, to));
                }
            }
            if self.aborted {
                break;
            }
            if let Some(found) = depth_best {
                best = found;
                if let Some(i) = moves.iter().position(|&m| m == found) {
                    let m = moves.remove(i);
                    moves.insert(0, m);
                }
            }
            if alpha >= MATE - i32::from(MAX_STRENGTH) {
                break;
            }
        }

        if self.cancel.load(Ordering::Relaxed) {
            return SearchOutcome::Cancelled;
        }
        SearchOutcome::Move {
            from: best.0,
            to: best.1,
        }
    }

    fn negamax(&mut self, board: &Board, depth: u8, mut alpha: i32, beta: i32, ply: i32) -> Option<i32> {
        self.nodes += 1;
        if self.nodes % POLL_INTERVAL == 0 && self.should_stop() {
            self.aborted = true;
        }
        if self.aborted {
            return None;
        }

        if depth == 0 {
            if !rules::has_legal_move(board) {
                return Some(-MATE + ply);
            }
            return Some(evaluate(board));
        }

        let moves = ordered_moves(board);
        if moves.is_empty() {
            return Some(-MATE + ply);
        }
        let mut best = -INFINITY;
        for (from, to) in moves {
            let mut next = board.clone();
            next.apply(from, to);
            let score = -self.negamax(&next, depth - 1, -beta, -alpha, ply + 1)?;
            best = best.max(score);
            alpha = alpha.max(score);
            if alpha >= beta {
                break;
            }
        }
        Some(best)
    }
}

fn piece_value(kind: PieceKind) -> i32 {
    match kind {
        PieceKind::General => 0,
        PieceKind::Advisor | PieceKind::Elephant => 200,
        PieceKind::Horse => 400,
        PieceKind::Cannon => 450,
        PieceKind::Chariot => 900,
        PieceKind::Soldier => 100,
    }
}

/// Material balance from the side to move's point of view.
fn evaluate(board: &Board) -> i32 {
    let us = board.side_to_move();
    board
        .pieces()
        .map(|(pos, piece)| {
            let mut value = piece_value(piece.kind);
            if piece.kind == PieceKind::Soldier && !pos.on_own_half(piece.side) {
                value += 100;
            }
            if piece.side == us {
                value
            } else {
                -value
            }
        })
        .sum()
}

/// Legal moves with captures first, most valuable victim then least
/// valuable attacker. The sort is stable so ties keep generation order.
fn ordered_moves(board: &Board) -> Vec<(Position, Position)> {
    let mut moves = rules::legal_moves(board);
    moves.sort_by_key(|&(from, to)| {
        let victim = board.piece_at(to).map_or(0, |p| piece_value(p.kind) + 1);
        let attacker = board.piece_at(from).map_or(0, |p| piece_value(p.kind));
        Reverse(if victim > 0 { victim * 10 - attacker } else { i32::MIN })
    });
    moves
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

    fn pos(file: u8, rank: u8) -> Position {
        Position::new(file, rank).unwrap()
    }

    #[test]
    fn strength_is_bounded() {
        let mut engine = MoveEngine::new();
        assert_eq!(engine.strength(), DEFAULT_STRENGTH);
        assert!(matches!(
            engine.configure_strength(0),
            Err(SessionError::InvalidStrength { level: 0, .. })
        ));
        assert!(engine.configure_strength(MAX_STRENGTH + 1).is_err());
        engine.configure_strength(MAX_STRENGTH).unwrap();
        assert_eq!(engine.depth(), MAX_STRENGTH);
        assert!(engine.time_budget() > MoveEngine::new().time_budget());
    }

    #[test]
    fn finds_mate_in_one() {
        let board = Board::from_fen("4k4/1R7/R8/9/9/9/9/9/9/3K5 w").unwrap();
        let mut engine = MoveEngine::new();
        engine.configure_strength(2).unwrap();
        assert_eq!(
            engine.select_move(&board, Side::Red),
            SearchOutcome::Move {
                from: pos(0, 7),
                to: pos(0, 9)
            }
        );
    }

    #[test]
    fn prefers_winning_material() {
        // The red chariot can take a hanging black chariot.
        let board = Board::from_fen("3k5/9/9/9/9/9/r8/9/9/R3K4 w").unwrap();
        let mut engine = MoveEngine::new();
        engine.configure_strength(1).unwrap();
        assert_eq!(
            engine.select_move(&board, Side::Red),
            SearchOutcome::Move {
                from: pos(0, 0),
                to: pos(0, 3)
            }
        );
    }

    #[test]
    fn mated_side_has_no_move() {
        let board = Board::from_fen("R3k4/R8/9/9/9/9/9/9/9/3K5 b").unwrap();
        assert_eq!(
            MoveEngine::new().select_move(&board, Side::Black),
            SearchOutcome::NoLegalMove
        );
    }

    #[test]
    fn same_input_gives_same_move() {
        let mut engine = MoveEngine::new();
        engine.configure_strength(1).unwrap();
        let board = Board::initial();
        assert_eq!(
            engine.select_move(&board, Side::Red),
            engine.select_move(&board, Side::Red)
        );
    }

    #[test]
    fn chosen_move_is_legal() {
        let mut engine = MoveEngine::new();
        engine.configure_strength(2).unwrap();
        let board = Board::initial();
        let SearchOutcome::Move { from, to } = engine.select_move(&board, Side::Red) else {
            panic!("expected a move");
        };
        assert!(rules::check_move(&board, from, to).is_ok());
    }

    #[test]
    fn cancelled_flag_stops_search() {
        let cancel = AtomicBool::new(true);
        assert_eq!(
            MoveEngine::new().select_move_with(&Board::initial(), Side::Red, &cancel),
            SearchOutcome::Cancelled
        );
    }

    #[tokio::test]
    async fn spawned_search_can_be_cancelled() {
        let mut engine = MoveEngine::new();
        engine.configure_strength(MAX_STRENGTH).unwrap();
        let handle = engine.spawn_search(Board::initial(), Side::Red);
        let canceller = handle.canceller();
        canceller.cancel();
        assert!(canceller.is_cancelled());
        assert_eq!(handle.outcome().await, SearchOutcome::Cancelled);
    }

    #[tokio::test]
    async fn spawned_search_returns_a_move() {
        let mut engine = MoveEngine::new();
        engine.configure_strength(1).unwrap();
        let outcome = engine.spawn_search(Board::initial(), Side::Red).outcome().await;
        assert!(matches!(outcome, SearchOutcome::Move { .. }));
    }
}
