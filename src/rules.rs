//! Piece movement, check detection and legal move generation.
//!
//! These functions know nothing about move history; repetition rules live in
//! [`crate::referee`].

use crate::board::{Board, PieceKind, Position, Side};
use crate::error::RuleViolation;

const ORTHOGONAL: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const DIAGONAL: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

/// Horse moves as `(leg, destination)` offsets; the leg square must be empty.
const HORSE_JUMPS: [((i8, i8), (i8, i8)); 8] = [
    ((1, 0), (2, 1)),
    ((1, 0), (2, -1)),
    ((-1, 0), (-2, 1)),
    ((-1, 0), (-2, -1)),
    ((0, 1), (1, 2)),
    ((0, 1), (-1, 2)),
    ((0, -1), (1, -2)),
    ((0, -1), (-1, -2)),
];

/// Squares the piece on `from` could move to, ignoring whether its own
/// general ends up in check. Squares holding friendly pieces are excluded.
pub fn destinations(board: &Board, from: Position) -> Vec<Position> {
    let Some(piece) = board.piece_at(from) else {
        return Vec::new();
    };
    let side = piece.side;
    let mut out = Vec::with_capacity(17);
    let mut push = |to: Position| {
        if board.piece_at(to).is_none_or(|target| target.side != side) {
            out.push(to);
        }
    };

    match piece.kind {
        PieceKind::General => {
            for (df, dr) in ORTHOGONAL {
                if let Some(to) = from.offset(df, dr).filter(|p| p.in_palace(side)) {
                    push(to);
                }
            }
        }
        PieceKind::Advisor => {
            for (df, dr) in DIAGONAL {
                if let Some(to) = from.offset(df, dr).filter(|p| p.in_palace(side)) {
                    push(to);
                }
            }
        }
        PieceKind::Elephant => {
            for (df, dr) in DIAGONAL {
                let eye_clear = from
                    .offset(df, dr)
                    .is_some_and(|eye| board.piece_at(eye).is_none());
                if let Some(to) = from.offset(2 * df, 2 * dr).filter(|p| p.on_own_half(side)) {
                    if eye_clear {
                        push(to);
                    }
                }
            }
        }
        PieceKind::Horse => {
            for ((lf, lr), (df, dr)) in HORSE_JUMPS {
                let leg_clear = from
                    .offset(lf, lr)
                    .is_some_and(|leg| board.piece_at(leg).is_none());
                if let Some(to) = from.offset(df, dr) {
                    if leg_clear {
                        push(to);
                    }
                }
            }
        }
        PieceKind::Chariot => {
            for (df, dr) in ORTHOGONAL {
                let mut cursor = from;
                while let Some(to) = cursor.offset(df, dr) {
                    push(to);
                    if board.piece_at(to).is_some() {
                        break;
                    }
                    cursor = to;
                }
            }
        }
        PieceKind::Cannon => {
            for (df, dr) in ORTHOGONAL {
                let mut cursor = from;
                let mut screened = false;
                while let Some(to) = cursor.offset(df, dr) {
                    cursor = to;
                    match (board.piece_at(to), screened) {
                        (None, false) => push(to),
                        (None, true) => {}
                        (Some(_), false) => screened = true,
                        (Some(_), true) => {
                            push(to);
                            break;
                        }
                    }
                }
            }
        }
        PieceKind::Soldier => {
            let forward = match side {
                Side::Red => 1,
                Side::Black => -1,
            };
            if let Some(to) = from.offset(0, forward) {
                push(to);
            }
            if !from.on_own_half(side) {
                for df in [-1, 1] {
                    if let Some(to) = from.offset(df, 0) {
                        push(to);
                    }
                }
            }
        }
    }
    out
}

/// Whether the two generals stand on the same file with nothing between them.
pub fn generals_facing(board: &Board) -> bool {
    let (Some(red), Some(black)) = (board.general(Side::Red), board.general(Side::Black)) else {
        return false;
    };
    if red.file() != black.file() {
        return false;
    }
    let (low, high) = (red.rank().min(black.rank()), red.rank().max(black.rank()));
    ((low + 1)..high).all(|rank| {
        Position::new(red.file(), rank).map_or(true, |p| board.piece_at(p).is_none())
    })
}

/// Whether any piece of `by` attacks `target`.
pub fn is_attacked(board: &Board, target: Position, by: Side) -> bool {
    board
        .pieces()
        .filter(|(_, piece)| piece.side == by)
        .any(|(from, _)| destinations(board, from).contains(&target))
}

/// Whether `side`'s general is attacked, or exposed to the other general.
///
/// A side without a general counts as in check.
pub fn in_check(board: &Board, side: Side) -> bool {
    match board.general(side) {
        Some(general) => generals_facing(board) || is_attacked(board, general, side.opponent()),
        None => true,
    }
}

/// Check the movement rules for a single move of the side to move.
///
/// # Errors
///
/// Returns the first [`RuleViolation`] the move breaks.
pub fn check_move(board: &Board, from: Position, to: Position) -> Result<(), RuleViolation> {
    let piece = board.piece_at(from).ok_or(RuleViolation::EmptySquare)?;
    if piece.side != board.side_to_move() {
        return Err(RuleViolation::NotYourTurn {
            to_move: board.side_to_move(),
        });
    }
    if board.piece_at(to).is_some_and(|target| target.side == piece.side) {
        return Err(RuleViolation::CaptureOwnPiece);
    }
    if !destinations(board, from).contains(&to) {
        return Err(RuleViolation::IllegalPieceMove);
    }
    let mut next = board.clone();
    next.apply(from, to);
    if in_check(&next, piece.side) {
        return Err(RuleViolation::LeavesGeneralInCheck);
    }
    Ok(())
}

/// Every legal `(from, to)` pair for the side to move.
pub fn legal_moves(board: &Board) -> Vec<(Position, Position)> {
    let side = board.side_to_move();
    let mut moves = Vec::new();
    for (from, _) in board.pieces().filter(|(_, p)| p.side == side) {
        for to in destinations(board, from) {
            let mut next = board.clone();
            next.apply(from, to);
            if !in_check(&next, side) {
                moves.push((from, to));
            }
        }
    }
    moves
}

/// Whether the side to move has at least one legal move.
pub fn has_legal_move(board: &Board) -> bool {
    let side = board.side_to_move();
    board
        .pieces()
        .filter(|(_, p)| p.side == side)
        .any(|(from, _)| {
            destinations(board, from).into_iter().any(|to| {
                let mut next = board.clone();
                next.apply(from, to);
                !in_check(&next, side)
            })
        })
}

/// Whether neither side keeps a piece that can cross the river.
pub fn insufficient_material(board: &Board) -> bool {
    board.pieces().all(|(_, piece)| !piece.kind.is_attacker())
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

    fn board(fen: &str) -> Board {
        Board::from_fen(fen).unwrap()
    }

    #[test]
    fn opening_position_has_44_moves() {
        assert_eq!(legal_moves(&Board::initial()).len(), 44);
    }

    #[test]
    fn general_stays_in_palace() {
        let b = board("4k4/9/9/9/9/9/9/9/9/3K5 w");
        let mut dests = destinations(&b, pos(3, 0));
        dests.sort();
        assert_eq!(dests, vec![pos(3, 1), pos(4, 0)]);
    }

    #[test]
    fn elephant_is_blocked_by_eye() {
        // A soldier on d1 blocks the eye towards e2.
        let b = board("4k4/9/9/9/9/9/9/9/3P5/2B1K4 w");
        assert_eq!(destinations(&b, pos(2, 0)), vec![pos(0, 2)]);
    }

    #[test]
    fn elephant_cannot_cross_river() {
        let b = board("4k4/9/9/9/9/2B6/9/9/9/4K4 w");
        let mut dests = destinations(&b, pos(2, 4));
        dests.sort();
        assert_eq!(dests, vec![pos(0, 2), pos(4, 2)]);
    }

    #[test]
    fn horse_leg_blocks_jump() {
        let b = board("4k4/9/9/9/9/9/9/9/1P7/1H2K4 w");
        let dests = destinations(&b, pos(1, 0));
        // Leg at b1 is blocked: a2 and c2 are unreachable; d1 stays reachable.
        assert!(!dests.contains(&pos(0, 2)));
        assert!(!dests.contains(&pos(2, 2)));
        assert!(dests.contains(&pos(3, 1)));
    }

    #[test]
    fn cannon_needs_screen_to_capture() {
        let b = board("4k4/9/9/9/9/9/9/9/9/C1p1pK3 w");
        let dests = destinations(&b, pos(0, 0));
        assert!(dests.contains(&pos(1, 0)));
        assert!(!dests.contains(&pos(2, 0)));
        assert!(!dests.contains(&pos(3, 0)));
        assert!(dests.contains(&pos(4, 0)));
    }

    #[test]
    fn soldier_moves_sideways_only_after_river() {
        let before = board("4k4/9/9/9/9/9/4P4/9/9/3K5 w");
        assert_eq!(destinations(&before, pos(4, 3)), vec![pos(4, 4)]);

        let after = board("4k4/9/9/9/4P4/9/9/9/9/3K5 w");
        let mut dests = destinations(&after, pos(4, 5));
        dests.sort();
        assert_eq!(dests, vec![pos(3, 5), pos(4, 6), pos(5, 5)]);
    }

    #[test]
    fn flying_general_counts_as_check() {
        let b = board("4k4/9/9/9/9/9/9/9/9/4K4 w");
        assert!(generals_facing(&b));
        assert!(in_check(&b, Side::Red));

        let blocked = board("4k4/9/9/9/4p4/9/9/9/9/4K4 w");
        assert!(!generals_facing(&blocked));
    }

    #[test]
    fn moving_a_pinned_piece_is_rejected() {
        // The red chariot on e3 shields the red general from the black chariot.
        let b = board("3k5/4r4/9/9/9/9/4R4/9/9/4K4 w");
        assert_eq!(
            check_move(&b, pos(4, 3), pos(0, 3)),
            Err(RuleViolation::LeavesGeneralInCheck)
        );
        assert_eq!(check_move(&b, pos(4, 3), pos(4, 8)), Ok(()));
    }

    #[test]
    fn check_move_reports_basic_violations() {
        let b = Board::initial();
        assert_eq!(
            check_move(&b, pos(4, 4), pos(4, 5)),
            Err(RuleViolation::EmptySquare)
        );
        assert_eq!(
            check_move(&b, pos(0, 6), pos(0, 5)),
            Err(RuleViolation::NotYourTurn { to_move: Side::Red })
        );
        assert_eq!(
            check_move(&b, pos(0, 0), pos(1, 0)),
            Err(RuleViolation::CaptureOwnPiece)
        );
        assert_eq!(
            check_move(&b, pos(0, 0), pos(1, 1)),
            Err(RuleViolation::IllegalPieceMove)
        );
    }

    #[test]
    fn checkmated_side_has_no_legal_move() {
        // Two red chariots on ranks 8 and 9 mate the black general.
        let b = board("R3k4/R8/9/9/9/9/9/9/9/3K5 b");
        assert!(in_check(&b, Side::Black));
        assert!(!has_legal_move(&b));
        assert!(legal_moves(&b).is_empty());
    }

    #[test]
    fn bare_generals_and_defenders_are_insufficient() {
        assert!(insufficient_material(&board("3ak4/9/9/9/9/9/9/9/9/3AK4 w")));
        assert!(!insufficient_material(&Board::initial()));
    }
}
