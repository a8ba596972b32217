//! UCI output line parser
//!
//! Turns one line of engine output into a typed update. Fields are located by
//! keyword, in any order; anything missing or garbled is simply left unset.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fields extracted from one `info` line. `None` means "not reported on this
/// line", never zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedUpdate {
    /// 1-based variation rank
    pub multipv: Option<u32>,
    pub depth: Option<u32>,
    pub nps: Option<u64>,
    /// Centipawn score
    pub cp: Option<i32>,
    /// Mate in N (negative when the side is getting mated)
    pub mate: Option<i32>,
    /// Principal variation moves
    pub pv: Option<Vec<String>>,
    /// Win / draw / loss, arbitrary total (Stockfish uses per-mille)
    pub wdl: Option<[u32; 3]>,
}

/// Classification of a raw engine output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    Info(ParsedUpdate),
    BestMove(String),
    Other,
}

/// Classify and parse one line of engine output.
pub fn parse_line(line: &str) -> EngineLine {
    if let Some(update) = parse_info(line) {
        return EngineLine::Info(update);
    }
    if let Some(best) = parse_bestmove(line) {
        return EngineLine::BestMove(best);
    }
    EngineLine::Other
}

/// Parse an `info ...` line. Returns `None` for any other line.
pub fn parse_info(line: &str) -> Option<ParsedUpdate> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.first() != Some(&"info") {
        return None;
    }

    let mut update = ParsedUpdate::default();
    for (i, part) in parts.iter().enumerate().skip(1) {
        match *part {
            "depth" => update.depth = update.depth.or_else(|| value_at(&parts, i + 1)),
            "nps" => update.nps = update.nps.or_else(|| value_at(&parts, i + 1)),
            "multipv" => update.multipv = update.multipv.or_else(|| value_at(&parts, i + 1)),
            "score" => match parts.get(i + 1) {
                Some(&"cp") => update.cp = update.cp.or_else(|| value_at(&parts, i + 2)),
                Some(&"mate") => update.mate = update.mate.or_else(|| value_at(&parts, i + 2)),
                _ => {}
            },
            "wdl" => update.wdl = update.wdl.or_else(|| parse_wdl(&parts, i + 1)),
            "pv" => {
                // pv runs to end of line
                let moves: Vec<String> = parts[i + 1..].iter().map(|m| m.to_string()).collect();
                if !moves.is_empty() {
                    update.pv = Some(moves);
                }
                break;
            }
            // Free text; nothing after it is a field
            "string" => break,
            _ => {}
        }
    }

    Some(update)
}

/// Parse a `bestmove <move> [ponder <move>]` line into the chosen move.
pub fn parse_bestmove(line: &str) -> Option<String> {
    let mut parts = line.split_whitespace();
    if parts.next() != Some("bestmove") {
        return None;
    }
    parts.next().map(String::from)
}

fn value_at<T: FromStr>(parts: &[&str], idx: usize) -> Option<T> {
    parts.get(idx).and_then(|v| v.parse().ok())
}

fn parse_wdl(parts: &[&str], idx: usize) -> Option<[u32; 3]> {
    let w = value_at(parts, idx)?;
    let d = value_at(parts, idx + 1)?;
    let l = value_at(parts, idx + 2)?;
    Some([w, d, l])
}
