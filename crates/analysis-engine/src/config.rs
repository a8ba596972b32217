//! Analysis configuration from environment variables

use std::env;
use std::str::FromStr;

use tracing::info;

use crate::error::EngineError;
use crate::pom::TimeControl;
use crate::session::AnalysisSettings;
use crate::stockfish::{EngineOptions, GoParams};

#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    /// Path to Stockfish binary
    pub stockfish_path: String,

    /// Ranked variations requested from the engine
    pub multipv: u32,

    /// Target depth for each search
    pub depth: u32,

    /// Optional time budget per search
    pub movetime_ms: Option<u64>,

    pub threads: u32,

    pub hash_mb: u32,

    pub white_elo: i32,

    pub black_elo: i32,

    pub time_control: TimeControl,

    /// Opening drawishness stage on/off
    pub use_book_heuristics: bool,

    /// Explanations kept when publishing
    pub explanation_limit: usize,
}

impl AnalysisConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, EngineError> {
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        info!(
            stockfish_path = %config.stockfish_path,
            multipv = config.multipv,
            depth = config.depth,
            time_control = %config.time_control,
            "Loaded analysis config"
        );
        Ok(config)
    }

    /// Build from any key lookup (the environment, or a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let stockfish_path = lookup("STOCKFISH_PATH")
            .unwrap_or_else(|| "/usr/local/bin/stockfish".to_string());

        let time_control = match lookup("TIME_CONTROL") {
            Some(value) => value
                .parse()
                .map_err(|_| EngineError::Config("TIME_CONTROL must be Bullet, Blitz, Rapid or Classical"))?,
            None => TimeControl::default(),
        };

        let use_book_heuristics = lookup("USE_BOOK_HEURISTICS")
            .and_then(|v| parse_flag(&v))
            .unwrap_or(true);

        Ok(Self {
            stockfish_path,
            multipv: parsed::<u32, _>(&lookup, "ANALYSIS_MULTIPV").unwrap_or(5).max(1),
            depth: parsed(&lookup, "ANALYSIS_DEPTH").unwrap_or(20),
            movetime_ms: parsed(&lookup, "ANALYSIS_MOVETIME_MS"),
            threads: parsed(&lookup, "ANALYSIS_THREADS").unwrap_or(1),
            hash_mb: parsed(&lookup, "ANALYSIS_HASH_MB").unwrap_or(256),
            white_elo: parsed(&lookup, "WHITE_ELO").unwrap_or(1800),
            black_elo: parsed(&lookup, "BLACK_ELO").unwrap_or(1800),
            time_control,
            use_book_heuristics,
            explanation_limit: parsed(&lookup, "EXPLANATION_LIMIT").unwrap_or(4),
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            threads: self.threads,
            hash_mb: self.hash_mb,
            multipv: self.multipv,
        }
    }

    pub fn go_params(&self) -> GoParams {
        GoParams {
            depth: Some(self.depth),
            movetime_ms: self.movetime_ms,
            multipv: Some(self.multipv),
        }
    }

    pub fn settings(&self) -> AnalysisSettings {
        AnalysisSettings {
            white_elo: self.white_elo,
            black_elo: self.black_elo,
            time_control: self.time_control,
            use_book_heuristics: self.use_book_heuristics,
            explanation_limit: self.explanation_limit,
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
