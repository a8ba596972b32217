//! Position features used by the outcome-probability heuristics.
//!
//! Everything here reads piece placement only. Side to move, castling rights
//! and move history play no part.

use serde::{Deserialize, Serialize};
use shakmaty::{Bitboard, Board, Color, File, Rank, Role, Square};

// Piece values in centipawns
pub const PAWN_CP: i32 = 100;
pub const KNIGHT_CP: i32 = 320;
pub const BISHOP_CP: i32 = 330;
pub const ROOK_CP: i32 = 500;
pub const QUEEN_CP: i32 = 900;

/// Endgame threshold on the number of non-queen pieces (kings and pawns included)
const ENDGAME_MAX_PIECES: usize = 10;

/// Opposite-bishops template only applies with at most this many pawns on board
const OPPOSITE_BISHOPS_MAX_PAWNS: usize = 8;

/// Passed-pawn counts plus the coarse aggregate flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassedPawns {
    pub white: u32,
    pub black: u32,
    /// Either side has two or more passers
    pub connected: bool,
    /// Either side has at least one passer
    pub outside: bool,
}

impl PassedPawns {
    pub fn any(&self) -> bool {
        self.white > 0 || self.black > 0
    }
}

/// Features derived fresh for every analysed position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionFeatures {
    /// White material minus Black material, in centipawns
    pub material_cp: i32,
    pub endgame: bool,
    pub opposite_bishops: bool,
    pub passed_pawns: PassedPawns,
}

/// Compute all features for a board.
pub fn extract(board: &Board) -> PositionFeatures {
    PositionFeatures {
        material_cp: material_balance(board),
        endgame: is_endgame(board),
        opposite_bishops: bishops_opposite_colors(board),
        passed_pawns: passed_pawns(board),
    }
}

/// Centipawn value of a piece type (king counts as zero).
pub fn piece_cp(role: Role) -> i32 {
    match role {
        Role::Pawn => PAWN_CP,
        Role::Knight => KNIGHT_CP,
        Role::Bishop => BISHOP_CP,
        Role::Rook => ROOK_CP,
        Role::Queen => QUEEN_CP,
        Role::King => 0,
    }
}

/// Signed material balance, positive when White is ahead.
pub fn material_balance(board: &Board) -> i32 {
    let mut balance = 0;
    for square in board.occupied() {
        if let Some(piece) = board.piece_at(square) {
            let value = piece_cp(piece.role);
            match piece.color {
                Color::White => balance += value,
                Color::Black => balance -= value,
            }
        }
    }
    balance
}

/// Queens are off and at most ten other pieces remain.
pub fn is_endgame(board: &Board) -> bool {
    let queens = board.by_role(Role::Queen).count();
    let others = board.occupied().count() - queens;
    queens == 0 && others <= ENDGAME_MAX_PIECES
}

/// Light/dark parity of a square from its file and rank indices.
fn square_parity(square: Square) -> u32 {
    (square.file() as u32 + square.rank() as u32) % 2
}

/// Exactly one bishop each on opposite square colours, queens off, few pawns.
pub fn bishops_opposite_colors(board: &Board) -> bool {
    let bishops = board.by_role(Role::Bishop);
    let white = bishops & board.by_color(Color::White);
    let black = bishops & board.by_color(Color::Black);

    if white.count() != 1 || black.count() != 1 {
        return false;
    }
    if !board.by_role(Role::Queen).is_empty()
        || board.by_role(Role::Pawn).count() > OPPOSITE_BISHOPS_MAX_PAWNS
    {
        return false;
    }

    match (white.first(), black.first()) {
        (Some(w), Some(b)) => square_parity(w) != square_parity(b),
        _ => false,
    }
}

/// A pawn is passed when no enemy pawn stands on any square strictly ahead
/// of it on its own file or the two adjacent files.
pub fn is_passed(square: Square, color: Color, enemy_pawns: Bitboard) -> bool {
    let file = square.file() as i32;
    let rank = square.rank() as i32;
    let ahead: Vec<i32> = match color {
        Color::White => (rank + 1..8).collect(),
        Color::Black => (0..rank).collect(),
    };

    for r in ahead {
        for f in (file - 1)..=(file + 1) {
            if !(0..8).contains(&f) {
                continue;
            }
            let sq = Square::from_coords(File::new(f as u32), Rank::new(r as u32));
            if enemy_pawns.contains(sq) {
                return false;
            }
        }
    }
    true
}

fn count_passers(board: &Board, color: Color) -> u32 {
    let pawns = board.by_role(Role::Pawn);
    let own = pawns & board.by_color(color);
    let enemy = pawns & board.by_color(!color);
    own.into_iter()
        .filter(|&sq| is_passed(sq, color, enemy))
        .count() as u32
}

/// Passed-pawn counts per side. `connected` and `outside` are whole-position
/// flags, not per-pawn geometry.
pub fn passed_pawns(board: &Board) -> PassedPawns {
    let white = count_passers(board, Color::White);
    let black = count_passers(board, Color::Black);
    PassedPawns {
        white,
        black,
        connected: white >= 2 || black >= 2,
        outside: white >= 1 || black >= 1,
    }
}
