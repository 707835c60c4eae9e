//! Board representation for Xiangqi: sides, pieces, squares and FEN.
//!
//! The board is 9 files wide and 10 ranks tall. Rank 0 is Red's back rank,
//! rank 9 is Black's. Red moves first.
//!
//! Positions are exchanged with the server as Xiangqi FEN strings:
//!
//! ```
//! use xiangqi_session::board::{Board, START_FEN};
//!
//! let board = Board::from_fen(START_FEN).unwrap();
//! assert_eq!(board.to_fen(), START_FEN);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RuleViolation, SessionError};

/// Number of files (columns).
pub const FILES: u8 = 9;

/// Number of ranks (rows).
pub const RANKS: u8 = 10;

const SQUARES: usize = (FILES as usize) * (RANKS as usize);

/// FEN of the standard starting position.
pub const START_FEN: &str = "rnbakabnr/9/1c5c1/p1p1p1p1p/9/9/P1P1P1P1P/1C5C1/9/RNBAKABNR w";

// ── Side ────────────────────────────────────────────────────────────

/// One of the two armies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Red,
    Black,
}

impl Side {
    /// Both sides, Red first.
    pub const ALL: [Side; 2] = [Side::Red, Side::Black];

    /// The other side.
    pub fn opponent(self) -> Self {
        match self {
            Side::Red => Side::Black,
            Side::Black => Side::Red,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Red => f.write_str("red"),
            Side::Black => f.write_str("black"),
        }
    }
}

// ── Pieces ──────────────────────────────────────────────────────────

/// Piece types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceKind {
    General,
    Advisor,
    Elephant,
    Horse,
    Chariot,
    Cannon,
    Soldier,
}

impl PieceKind {
    fn fen_char(self) -> char {
        match self {
            PieceKind::General => 'k',
            PieceKind::Advisor => 'a',
            PieceKind::Elephant => 'b',
            PieceKind::Horse => 'n',
            PieceKind::Chariot => 'r',
            PieceKind::Cannon => 'c',
            PieceKind::Soldier => 'p',
        }
    }

    fn from_fen_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'k' => Some(PieceKind::General),
            'a' => Some(PieceKind::Advisor),
            'b' | 'e' => Some(PieceKind::Elephant),
            'n' | 'h' => Some(PieceKind::Horse),
            'r' => Some(PieceKind::Chariot),
            'c' => Some(PieceKind::Cannon),
            'p' => Some(PieceKind::Soldier),
            _ => None,
        }
    }

    /// Whether this piece can ever cross the river.
    pub fn is_attacker(self) -> bool {
        matches!(
            self,
            PieceKind::Horse | PieceKind::Chariot | PieceKind::Cannon | PieceKind::Soldier
        )
    }
}

/// A piece of a given kind belonging to a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Piece {
    pub kind: PieceKind,
    pub side: Side,
}

impl Piece {
    pub const fn new(kind: PieceKind, side: Side) -> Self {
        Self { kind, side }
    }

    fn fen_char(self) -> char {
        let c = self.kind.fen_char();
        match self.side {
            Side::Red => c.to_ascii_uppercase(),
            Side::Black => c,
        }
    }

    fn from_fen_char(c: char) -> Option<Self> {
        let kind = PieceKind::from_fen_char(c)?;
        let side = if c.is_ascii_uppercase() {
            Side::Red
        } else {
            Side::Black
        };
        Some(Self { kind, side })
    }
}

// ── Position ────────────────────────────────────────────────────────

/// A square on the board. Always on the board once constructed.
///
/// On the wire a position is the pair `[file, rank]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "(u8, u8)", into = "(u8, u8)")]
pub struct Position {
    file: u8,
    rank: u8,
}

impl Position {
    /// Create a position, rejecting squares off the board.
    pub fn new(file: u8, rank: u8) -> Result<Self, RuleViolation> {
        if file < FILES && rank < RANKS {
            Ok(Self { file, rank })
        } else {
            Err(RuleViolation::OffBoard { file, rank })
        }
    }

    pub fn file(self) -> u8 {
        self.file
    }

    pub fn rank(self) -> u8 {
        self.rank
    }

    /// The square `(df, dr)` away, if it is on the board.
    pub fn offset(self, df: i8, dr: i8) -> Option<Self> {
        let file = u8::try_from(i16::from(self.file) + i16::from(df)).ok()?;
        let rank = u8::try_from(i16::from(self.rank) + i16::from(dr)).ok()?;
        Self::new(file, rank).ok()
    }

    /// Whether the square lies inside `side`'s palace.
    pub fn in_palace(self, side: Side) -> bool {
        let ranks = match side {
            Side::Red => 0..=2,
            Side::Black => 7..=9,
        };
        (3..=5).contains(&self.file) && ranks.contains(&self.rank)
    }

    /// Whether the square lies on `side`'s half of the river.
    pub fn on_own_half(self, side: Side) -> bool {
        match side {
            Side::Red => self.rank <= 4,
            Side::Black => self.rank >= 5,
        }
    }

    fn index(self) -> usize {
        usize::from(self.rank) * usize::from(FILES) + usize::from(self.file)
    }

    fn all() -> impl Iterator<Item = Position> {
        (0..RANKS).flat_map(|rank| (0..FILES).map(move |file| Position { file, rank }))
    }
}

impl TryFrom<(u8, u8)> for Position {
    type Error = RuleViolation;

    fn try_from((file, rank): (u8, u8)) -> Result<Self, Self::Error> {
        Self::new(file, rank)
    }
}

impl From<Position> for (u8, u8) {
    fn from(pos: Position) -> Self {
        (pos.file, pos.rank)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = char::from(b'a' + self.file);
        write!(f, "{file}{}", self.rank)
    }
}

// ── Board ───────────────────────────────────────────────────────────

/// Piece placement plus the side to move.
///
/// `Board` performs no legality checks; see [`crate::referee::Referee`].
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Board {
    squares: [Option<Piece>; SQUARES],
    side_to_move: Side,
}

impl Board {
    /// A board with no pieces.
    pub fn empty(side_to_move: Side) -> Self {
        Self {
            squares: [None; SQUARES],
            side_to_move,
        }
    }

    /// The standard starting position.
    pub fn initial() -> Self {
        let mut board = Self::empty(Side::Red);
        let back = [
            PieceKind::Chariot,
            PieceKind::Horse,
            PieceKind::Elephant,
            PieceKind::Advisor,
            PieceKind::General,
            PieceKind::Advisor,
            PieceKind::Elephant,
            PieceKind::Horse,
            PieceKind::Chariot,
        ];
        for side in Side::ALL {
            let (back_rank, cannon_rank, soldier_rank) = match side {
                Side::Red => (0, 2, 3),
                Side::Black => (9, 7, 6),
            };
            for (file, kind) in (0u8..).zip(back) {
                board.put(file, back_rank, Piece::new(kind, side));
            }
            board.put(1, cannon_rank, Piece::new(PieceKind::Cannon, side));
            board.put(7, cannon_rank, Piece::new(PieceKind::Cannon, side));
            for file in [0, 2, 4, 6, 8] {
                board.put(file, soldier_rank, Piece::new(PieceKind::Soldier, side));
            }
        }
        board
    }

    fn put(&mut self, file: u8, rank: u8, piece: Piece) {
        if let Ok(pos) = Position::new(file, rank) {
            self.set(pos, Some(piece));
        }
    }

    pub fn piece_at(&self, pos: Position) -> Option<Piece> {
        self.squares.get(pos.index()).copied().flatten()
    }

    pub fn set(&mut self, pos: Position, piece: Option<Piece>) {
        if let Some(square) = self.squares.get_mut(pos.index()) {
            *square = piece;
        }
    }

    pub fn side_to_move(&self) -> Side {
        self.side_to_move
    }

    pub fn set_side_to_move(&mut self, side: Side) {
        self.side_to_move = side;
    }

    /// All occupied squares, rank by rank from Red's back rank.
    pub fn pieces(&self) -> impl Iterator<Item = (Position, Piece)> + '_ {
        Position::all().filter_map(|pos| self.piece_at(pos).map(|piece| (pos, piece)))
    }

    /// Where `side`'s general stands.
    pub fn general(&self, side: Side) -> Option<Position> {
        self.pieces()
            .find(|(_, p)| p.kind == PieceKind::General && p.side == side)
            .map(|(pos, _)| pos)
    }

    /// Move whatever stands on `from` to `to` and pass the turn.
    ///
    /// Returns the captured piece. No rules are checked.
    pub fn apply(&mut self, from: Position, to: Position) -> Option<Piece> {
        let moving = self.piece_at(from);
        let captured = self.piece_at(to);
        self.set(to, moving);
        self.set(from, None);
        self.side_to_move = self.side_to_move.opponent();
        captured
    }

    /// Render the position as Xiangqi FEN (placement and side to move).
    pub fn to_fen(&self) -> String {
        let mut out = String::with_capacity(64);
        for rank in (0..RANKS).rev() {
            let mut empty = 0u8;
            for file in 0..FILES {
                match Position::new(file, rank).ok().and_then(|p| self.piece_at(p)) {
                    Some(piece) => {
                        if empty > 0 {
                            out.push(char::from(b'0' + empty));
                            empty = 0;
                        }
                        out.push(piece.fen_char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                out.push(char::from(b'0' + empty));
            }
            if rank > 0 {
                out.push('/');
            }
        }
        out.push(' ');
        out.push(match self.side_to_move {
            Side::Red => 'w',
            Side::Black => 'b',
        });
        out
    }

    /// Parse a Xiangqi FEN string.
    ///
    /// Only the placement and side-to-move fields are read; trailing move
    /// counters are ignored. Each side must have exactly one general.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidPosition`] if the string is malformed.
    pub fn from_fen(fen: &str) -> Result<Self, SessionError> {
        let invalid = |why: &str| SessionError::InvalidPosition(format!("{why}: {fen:?}"));

        let mut fields = fen.split_whitespace();
        let placement = fields.next().ok_or_else(|| invalid("empty FEN"))?;
        let side_to_move = match fields.next() {
            None | Some("w") | Some("r") => Side::Red,
            Some("b") => Side::Black,
            Some(_) => return Err(invalid("bad side to move")),
        };

        let rows: Vec<&str> = placement.split('/').collect();
        if rows.len() != usize::from(RANKS) {
            return Err(invalid("expected 10 ranks"));
        }

        let mut board = Self::empty(side_to_move);
        for (row, rank) in rows.iter().zip((0..RANKS).rev()) {
            let mut file = 0u8;
            for c in row.chars() {
                if let Some(skip) = c.to_digit(10) {
                    file = file.saturating_add(u8::try_from(skip).unwrap_or(u8::MAX));
                    continue;
                }
                let piece = Piece::from_fen_char(c).ok_or_else(|| invalid("unknown piece"))?;
                let pos = Position::new(file, rank).map_err(|_| invalid("rank too long"))?;
                board.set(pos, Some(piece));
                file += 1;
            }
            if file != FILES {
                return Err(invalid("rank does not have 9 files"));
            }
        }

        for side in Side::ALL {
            let generals = board
                .pieces()
                .filter(|(_, p)| p.kind == PieceKind::General && p.side == side)
                .count();
            if generals != 1 {
                return Err(invalid("each side needs exactly one general"));
            }
        }
        Ok(board)
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Board").field(&self.to_fen()).finish()
    }
}

impl FromStr for Board {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_fen(s)
    }
}

impl TryFrom<String> for Board {
    type Error = SessionError;

    fn try_from(fen: String) -> Result<Self, Self::Error> {
        Self::from_fen(&fen)
    }
}

impl From<Board> for String {
    fn from(board: Board) -> Self {
        board.to_fen()
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

    #[test]
    fn initial_position_matches_start_fen() {
        assert_eq!(Board::initial().to_fen(), START_FEN);
        assert_eq!(Board::from_fen(START_FEN).unwrap(), Board::initial());
    }

    #[test]
    fn initial_position_layout() {
        let board = Board::initial();
        assert_eq!(board.pieces().count(), 32);
        assert_eq!(board.general(Side::Red), Some(pos(4, 0)));
        assert_eq!(board.general(Side::Black), Some(pos(4, 9)));
        assert_eq!(
            board.piece_at(pos(1, 2)),
            Some(Piece::new(PieceKind::Cannon, Side::Red))
        );
        assert_eq!(
            board.piece_at(pos(8, 6)),
            Some(Piece::new(PieceKind::Soldier, Side::Black))
        );
        assert_eq!(board.side_to_move(), Side::Red);
    }

    #[test]
    fn off_board_positions_are_rejected() {
        assert_eq!(
            Position::new(9, 0),
            Err(RuleViolation::OffBoard { file: 9, rank: 0 })
        );
        assert!(Position::new(0, 10).is_err());
        assert!(pos(0, 0).offset(-1, 0).is_none());
        assert_eq!(pos(0, 0).offset(1, 2), Some(pos(1, 2)));
    }

    #[test]
    fn palace_and_river() {
        assert!(pos(4, 1).in_palace(Side::Red));
        assert!(!pos(2, 1).in_palace(Side::Red));
        assert!(pos(3, 9).in_palace(Side::Black));
        assert!(pos(0, 4).on_own_half(Side::Red));
        assert!(!pos(0, 5).on_own_half(Side::Red));
        assert!(pos(0, 5).on_own_half(Side::Black));
    }

    #[test]
    fn apply_moves_piece_and_passes_turn() {
        let mut board = Board::initial();
        let captured = board.apply(pos(1, 2), pos(4, 2));
        assert!(captured.is_none());
        assert!(board.piece_at(pos(1, 2)).is_none());
        assert_eq!(board.side_to_move(), Side::Black);
        assert_eq!(
            board.to_fen(),
            "rnbakabnr/9/1c5c1/p1p1p1p1p/9/9/P1P1P1P1P/4C2C1/9/RNBAKABNR b"
        );
    }

    #[test]
    fn malformed_fen_is_rejected() {
        assert!(Board::from_fen("").is_err());
        assert!(Board::from_fen("rnbakabnr/9/9 w").is_err());
        assert!(Board::from_fen("rnbakabnr/9/1c5c1/p1p1p1p1p/9/9/P1P1P1P1P/1C5C1/9/RNBAKABN w").is_err());
        assert!(Board::from_fen("rnbaxabnr/9/1c5c1/p1p1p1p1p/9/9/P1P1P1P1P/1C5C1/9/RNBAKABNR w").is_err());
        // Missing red general.
        assert!(Board::from_fen("rnbakabnr/9/1c5c1/p1p1p1p1p/9/9/P1P1P1P1P/1C5C1/9/RNBA1ABNR w").is_err());
    }

    #[test]
    fn black_to_move_is_parsed() {
        let board = Board::from_fen("4k4/9/9/9/9/9/9/9/9/4K4 b").unwrap();
        assert_eq!(board.side_to_move(), Side::Black);
        assert_eq!(board.pieces().count(), 2);
    }

    #[test]
    fn board_serializes_as_fen_string() {
        let json = serde_json::to_string(&Board::initial()).unwrap();
        assert_eq!(json, format!("\"{START_FEN}\""));
        let back: Board = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Board::initial());
    }

    #[test]
    fn position_serializes_as_pair_and_validates() {
        assert_eq!(serde_json::to_string(&pos(4, 9)).unwrap(), "[4,9]");
        assert!(serde_json::from_str::<Position>("[9,9]").is_err());
    }

    #[test]
    fn position_display_uses_file_letters() {
        assert_eq!(pos(0, 0).to_string(), "a0");
        assert_eq!(pos(8, 9).to_string(), "i9");
    }
}
