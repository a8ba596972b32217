//! Position snapshot: a base position plus the UCI moves played since it.
//!
//! Legality and FEN bookkeeping are delegated to shakmaty.

use serde::{Deserialize, Serialize};
use shakmaty::{
    fen::Fen, uci::UciMove, CastlingMode, Chess, Color, EnPassantMode, Position,
};

use crate::features::{self, PositionFeatures};

/// Where the move list starts from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasePosition {
    StartPos,
    Fen(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PositionError {
    #[error("Invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },

    #[error("Invalid UCI move: {0}")]
    InvalidMove(String),

    #[error("Illegal move {0} in current position")]
    IllegalMove(String),
}

#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    base: BasePosition,
    moves: Vec<String>,
    position: Chess,
}

impl Default for PositionSnapshot {
    fn default() -> Self {
        Self::startpos()
    }
}

impl PositionSnapshot {
    /// Standard starting position with no moves played.
    pub fn startpos() -> Self {
        Self {
            base: BasePosition::StartPos,
            moves: Vec::new(),
            position: Chess::default(),
        }
    }

    /// Start from an arbitrary FEN.
    pub fn from_fen(fen: &str) -> Result<Self, PositionError> {
        let parsed: Fen = fen.parse().map_err(|e| PositionError::InvalidFen {
            fen: fen.to_string(),
            reason: format!("{e}"),
        })?;
        let position: Chess =
            parsed
                .into_position(CastlingMode::Standard)
                .map_err(|e| PositionError::InvalidFen {
                    fen: fen.to_string(),
                    reason: format!("{e}"),
                })?;

        Ok(Self {
            base: BasePosition::Fen(fen.to_string()),
            moves: Vec::new(),
            position,
        })
    }

    /// Play a move in UCI notation (`e2e4`, `e7e8q`).
    pub fn play_uci(&mut self, uci: &str) -> Result<(), PositionError> {
        let uci_move: UciMove = uci
            .parse()
            .map_err(|_| PositionError::InvalidMove(uci.to_string()))?;
        let legal_move = uci_move
            .to_move(&self.position)
            .map_err(|_| PositionError::IllegalMove(uci.to_string()))?;

        self.position.play_unchecked(legal_move);
        self.moves.push(uci.to_string());
        Ok(())
    }

    pub fn base(&self) -> &BasePosition {
        &self.base
    }

    /// UCI moves played since the base position.
    pub fn moves(&self) -> &[String] {
        &self.moves
    }

    /// Half-moves played since the base position.
    pub fn ply_count(&self) -> usize {
        self.moves.len()
    }

    pub fn legal_move_count(&self) -> usize {
        self.position.legal_moves().len()
    }

    pub fn turn(&self) -> Color {
        self.position.turn()
    }

    pub fn fen(&self) -> String {
        Fen::from_position(&self.position, EnPassantMode::Legal).to_string()
    }

    pub fn features(&self) -> PositionFeatures {
        features::extract(self.position.board())
    }
}
