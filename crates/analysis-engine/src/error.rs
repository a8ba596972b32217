//! Analysis error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(&'static str),

    #[error("Stockfish error: {0}")]
    Stockfish(String),

    #[error("Position error: {0}")]
    Position(#[from] chess_core::PositionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
