//! Outcome probability model.
//!
//! Maps the engine's view of a position (best evaluation, optional native
//! WDL, the ranked variations) plus game context (ratings, time control,
//! position features) to a White / Draw / Black probability triple and an
//! ordered list of explanations. Pure functions only; every stage rescales
//! the triple to sum to 1 before the next one runs.

use std::fmt;
use std::str::FromStr;

use chess_core::PositionFeatures;
use serde::{Deserialize, Serialize};

use crate::variations::VariationRecord;

/// Evaluations beyond this are treated as this (centipawns)
const EVAL_CLAMP_CP: f64 = 1500.0;

/// Decay of the draw share as the evaluation grows (centipawns)
const DRAW_DECAY_CP: f64 = 350.0;

/// Logistic scale splitting decisive mass between the sides (centipawns)
const LOGISTIC_SCALE_CP: f64 = 120.0;

/// Weight of the rating expectation on each side's win probability
const RATING_WEIGHT: f64 = 0.18;

/// Rating gaps smaller than this are not worth mentioning
const RATING_EXPLAIN_GAP: u32 = 100;

/// A move "keeps the edge" if it is within this many centipawns of the best
const EDGE_WINDOW_CP: i32 = 50;

const RATIO_PIVOT: f64 = 0.15;
const RATIO_GAIN: f64 = 0.6;
const RATIO_FACTOR_MIN: f64 = 0.7;
const RATIO_FACTOR_MAX: f64 = 1.3;

const SHARPNESS_SCALE_CP: f64 = 80.0;
const VOLATILITY_SCALE_CP: f64 = 100.0;
const MAX_DECISIVE_BOOST: f64 = 0.20;
const MAX_DECISIVE_MASS: f64 = 0.98;

/// Material lead needed before an endgame counts as convertible (centipawns)
const ENDGAME_LEAD_CP: i32 = 200;
const ENDGAME_BUMP_RANGE_CP: f64 = 600.0;
const MAX_ENDGAME_BUMP: f64 = 0.25;

/// Probability moved from each side into the draw for opposite bishops
const OPPOSITE_BISHOPS_SHIFT: f64 = 0.06;

const PASSER_BASE_BOOST: f64 = 0.05;
const PASSER_CONNECTED_BOOST: f64 = 0.03;
const PASSER_OUTSIDE_BOOST: f64 = 0.02;
const MAX_PASSER_BOOST: f64 = 0.12;

const BOOK_MAX_PLY: usize = 14;
const BOOK_EQUAL_CP: u32 = 25;
const BOOK_DRAW_BUMP: f64 = 0.07;
const BOOK_DRAW_CEILING: f64 = 0.90;

/// Losing side's share right after a mate override, before renormalisation
const MATE_LOSER_PLACEHOLDER: f64 = 0.001;

const SIDE_FLOOR: f64 = 0.01;
const DRAW_FLOOR: f64 = 0.05;
const CEILING: f64 = 0.99;

/// Game speed; shifts the baseline draw rate and the mate confidence cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeControl {
    Bullet,
    Blitz,
    #[default]
    Rapid,
    Classical,
}

impl TimeControl {
    /// Draw probability of a dead-equal position
    pub fn draw_base(&self) -> f64 {
        match self {
            TimeControl::Bullet => 0.20,
            TimeControl::Blitz => 0.28,
            TimeControl::Rapid => 0.33,
            TimeControl::Classical => 0.38,
        }
    }

    /// Minimum win probability for the mating side
    pub fn mate_cap(&self) -> f64 {
        match self {
            TimeControl::Bullet => 0.95,
            TimeControl::Blitz => 0.97,
            TimeControl::Rapid => 0.98,
            TimeControl::Classical => 0.99,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimeControl::Bullet => "Bullet",
            TimeControl::Blitz => "Blitz",
            TimeControl::Rapid => "Rapid",
            TimeControl::Classical => "Classical",
        }
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TimeControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullet" => Ok(TimeControl::Bullet),
            "blitz" => Ok(TimeControl::Blitz),
            "rapid" => Ok(TimeControl::Rapid),
            "classical" => Ok(TimeControl::Classical),
            other => Err(format!("unknown time control '{other}'")),
        }
    }
}

/// White win / draw / Black win.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeProbabilities {
    pub white: f64,
    pub draw: f64,
    pub black: f64,
}

impl Default for OutcomeProbabilities {
    fn default() -> Self {
        Self::neutral()
    }
}

impl OutcomeProbabilities {
    pub const UNIFORM: Self = Self {
        white: 1.0 / 3.0,
        draw: 1.0 / 3.0,
        black: 1.0 / 3.0,
    };

    pub fn new(white: f64, draw: f64, black: f64) -> Self {
        Self { white, draw, black }
    }

    /// Shown before any engine output has arrived.
    pub fn neutral() -> Self {
        Self::new(0.33, 0.34, 0.33)
    }

    pub fn sum(&self) -> f64 {
        self.white + self.draw + self.black
    }

    /// Rescale to sum to 1; a non-positive sum falls back to uniform.
    pub fn renormalized(self) -> Self {
        let sum = self.sum();
        if sum <= 0.0 || !sum.is_finite() {
            return Self::UNIFORM;
        }
        Self::new(self.white / sum, self.draw / sum, self.black / sum)
    }

    /// Clamp each component into its range and renormalise without leaving
    /// the ranges: components already pinned at the bound the rescale would
    /// cross stay fixed and the others absorb the difference.
    pub fn clamped(self, lo: [f64; 3], hi: [f64; 3]) -> Self {
        let mut v = self.to_array();
        for i in 0..3 {
            v[i] = v[i].clamp(lo[i], hi[i]);
        }

        // Each pass pins at least one more component.
        for _ in 0..4 {
            let sum: f64 = v.iter().sum();
            if (sum - 1.0).abs() < 1e-12 {
                break;
            }
            let shrinking = sum > 1.0;
            let free: Vec<usize> = (0..3)
                .filter(|&i| if shrinking { v[i] > lo[i] } else { v[i] < hi[i] })
                .collect();
            let free_sum: f64 = free.iter().map(|&i| v[i]).sum();
            if free_sum <= 0.0 {
                break;
            }
            let scale = (1.0 - (sum - free_sum)) / free_sum;
            for &i in &free {
                v[i] = (v[i] * scale).clamp(lo[i], hi[i]);
            }
        }

        Self::new(v[0], v[1], v[2])
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.white, self.draw, self.black]
    }

    /// One-line percentage summary, e.g. `White 33.5% | Draw 33.0% | Black 33.5%`.
    pub fn headline(&self) -> String {
        format!(
            "White {:.1}% | Draw {:.1}% | Black {:.1}%",
            self.white * 100.0,
            self.draw * 100.0,
            self.black * 100.0
        )
    }
}

/// Everything the model looks at for one computation.
#[derive(Debug, Clone)]
pub struct PomInputs<'a> {
    /// Best line's centipawn score, White-positive
    pub eval_cp: Option<i32>,
    /// Best line's native win/draw/loss, White-first
    pub engine_wdl: Option<[u32; 3]>,
    /// Merged variations, ascending by rank
    pub variations: &'a [VariationRecord],
    pub legal_moves: usize,
    pub white_elo: i32,
    pub black_elo: i32,
    pub time_control: TimeControl,
    pub features: PositionFeatures,
    /// Half-moves played so far
    pub ply_count: usize,
    /// Best evaluation of the previous computation
    pub previous_eval_cp: Option<i32>,
    pub use_book_heuristics: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PomOutput {
    pub probabilities: OutcomeProbabilities,
    /// Most decisive factor first
    pub explanations: Vec<String>,
}

/// Baseline triple: the engine's own WDL when available, otherwise a
/// logistic mapping of the centipawn evaluation.
pub fn base_mapping(
    eval_cp: Option<i32>,
    engine_wdl: Option<[u32; 3]>,
    time_control: TimeControl,
) -> OutcomeProbabilities {
    if let Some([w, d, l]) = engine_wdl {
        let total = (w as f64) + (d as f64) + (l as f64);
        let total = if total == 0.0 { 1.0 } else { total };
        return OutcomeProbabilities::new(w as f64 / total, d as f64 / total, l as f64 / total)
            .renormalized();
    }

    let s = (eval_cp.unwrap_or(0) as f64).clamp(-EVAL_CLAMP_CP, EVAL_CLAMP_CP);
    let decisive = 1.0 - time_control.draw_base() * (-s.abs() / DRAW_DECAY_CP).exp();
    let white = decisive * logistic(s / LOGISTIC_SCALE_CP);
    let black = decisive - white;
    OutcomeProbabilities::new(white, 1.0 - decisive, black).renormalized()
}

/// Run the full pipeline.
pub fn compute(inputs: &PomInputs<'_>) -> PomOutput {
    let best = inputs.variations.iter().find(|v| v.multipv == 1);
    let best_cp = best.and_then(|v| v.cp).or(inputs.eval_cp).unwrap_or(0);

    let mut estimate = Estimate {
        p: base_mapping(inputs.eval_cp, inputs.engine_wdl, inputs.time_control),
        why: vec![if inputs.engine_wdl.is_some() {
            "Engine WDL baseline".to_string()
        } else {
            "Evaluation-based baseline".to_string()
        }],
    };

    estimate.rating_adjustment(inputs.white_elo, inputs.black_elo);
    estimate.winning_moves_ratio(inputs.variations, best_cp, inputs.legal_moves);
    estimate.sharpness(inputs.variations, inputs.eval_cp, inputs.previous_eval_cp);
    estimate.endgame_conversion(&inputs.features);
    estimate.opposite_bishops(&inputs.features);
    estimate.passed_pawns(&inputs.features, best_cp);
    if inputs.use_book_heuristics {
        estimate.opening_drawishness(inputs.ply_count, inputs.eval_cp);
    }
    let mate_override = match best.and_then(|v| v.mate) {
        Some(mate) => estimate.mate_override(mate, inputs.time_control),
        None => false,
    };
    estimate.final_clamp(mate_override);

    PomOutput {
        probabilities: estimate.p,
        explanations: estimate.why,
    }
}

struct Estimate {
    p: OutcomeProbabilities,
    why: Vec<String>,
}

impl Estimate {
    fn renormalize(&mut self) {
        self.p = self.p.renormalized();
    }

    fn rating_adjustment(&mut self, white_elo: i32, black_elo: i32) {
        let gap = white_elo.saturating_sub(black_elo);
        let expected_white = 1.0 / (1.0 + 10f64.powf(-(gap as f64) / 400.0));
        let expected_black = 1.0 - expected_white;

        self.p.white *= 1.0 + RATING_WEIGHT * (expected_white - 0.5);
        self.p.black *= 1.0 + RATING_WEIGHT * (expected_black - 0.5);
        self.renormalize();

        if gap.unsigned_abs() >= RATING_EXPLAIN_GAP {
            let favored = if gap > 0 { "White" } else { "Black" };
            self.why
                .push(format!("Elo gap favors {favored} (~{})", gap.unsigned_abs()));
        }
    }

    fn winning_moves_ratio(&mut self, variations: &[VariationRecord], best_cp: i32, legal_moves: usize) {
        if variations.is_empty() {
            return;
        }

        let keeping_edge = variations
            .iter()
            .filter(|v| v.cp.is_some_and(|cp| cp >= best_cp.saturating_sub(EDGE_WINDOW_CP)))
            .count();
        let ratio = keeping_edge as f64 / legal_moves.max(1) as f64;
        let factor = (1.0 + RATIO_GAIN * (ratio - RATIO_PIVOT)).clamp(RATIO_FACTOR_MIN, RATIO_FACTOR_MAX);

        if best_cp >= 0 {
            self.p.white *= factor;
        } else {
            self.p.black *= factor;
        }
        self.renormalize();
        self.why.push(format!(
            "{}% of moves keep the edge",
            (ratio * 100.0).round() as i64
        ));
    }

    fn sharpness(&mut self, variations: &[VariationRecord], eval_cp: Option<i32>, previous_eval_cp: Option<i32>) {
        let scores: Vec<f64> = variations
            .iter()
            .map(|v| v.cp.unwrap_or(0) as f64)
            .collect();
        let sharpness = std_dev(&scores);
        let volatility = previous_eval_cp
            .map(|prev| (eval_cp.unwrap_or(0) as f64 - prev as f64).abs())
            .unwrap_or(0.0);
        let boost = (sharpness / SHARPNESS_SCALE_CP + volatility / VOLATILITY_SCALE_CP)
            .clamp(0.0, MAX_DECISIVE_BOOST);

        let mass = 1.0 - self.p.draw;
        let target = (mass * (1.0 + boost)).clamp(0.0, MAX_DECISIVE_MASS);
        let scale = if mass == 0.0 { 1.0 } else { target / mass };
        self.p.white *= scale;
        self.p.black *= scale;
        self.p.draw = 1.0 - (self.p.white + self.p.black);
        self.renormalize();

        if boost > 0.01 {
            self.why.push(format!(
                "Sharp/volatile position (decisive odds +{}%)",
                (boost * 100.0).round() as i64
            ));
        }
    }

    fn endgame_conversion(&mut self, features: &PositionFeatures) {
        let material = features.material_cp;
        if !features.endgame || material.abs() <= ENDGAME_LEAD_CP {
            return;
        }

        let bump = ((material.abs() - ENDGAME_LEAD_CP) as f64 / ENDGAME_BUMP_RANGE_CP)
            .clamp(0.0, MAX_ENDGAME_BUMP);
        let leader = if material > 0 {
            self.p.white *= 1.0 + bump;
            "White"
        } else {
            self.p.black *= 1.0 + bump;
            "Black"
        };
        self.renormalize();
        self.why.push(format!(
            "{leader} material edge in endgame (+{}% win)",
            (bump * 100.0).round() as i64
        ));
    }

    fn opposite_bishops(&mut self, features: &PositionFeatures) {
        if !features.opposite_bishops {
            return;
        }
        // May dip below zero here; the final clamp takes care of it
        self.p.draw += 2.0 * OPPOSITE_BISHOPS_SHIFT;
        self.p.white -= OPPOSITE_BISHOPS_SHIFT;
        self.p.black -= OPPOSITE_BISHOPS_SHIFT;
        self.renormalize();
        self.why
            .push("Opposite-colored bishops endgame (drawish)".to_string());
    }

    fn passed_pawns(&mut self, features: &PositionFeatures, best_cp: i32) {
        let passers = &features.passed_pawns;
        if !passers.any() {
            return;
        }

        let mut boost = PASSER_BASE_BOOST;
        if passers.connected {
            boost += PASSER_CONNECTED_BOOST;
        }
        if passers.outside {
            boost += PASSER_OUTSIDE_BOOST;
        }
        let boost = boost.clamp(0.0, MAX_PASSER_BOOST);

        if best_cp >= 0 {
            self.p.white += boost;
        } else {
            self.p.black += boost;
        }
        self.p.draw -= boost;
        self.renormalize();
        self.why
            .push("Passed pawns improve convertibility".to_string());
    }

    fn opening_drawishness(&mut self, ply_count: usize, eval_cp: Option<i32>) {
        if ply_count > BOOK_MAX_PLY || eval_cp.unwrap_or(0).unsigned_abs() >= BOOK_EQUAL_CP {
            return;
        }
        self.p.draw = self
            .p
            .draw
            .max((self.p.draw + BOOK_DRAW_BUMP).min(BOOK_DRAW_CEILING));
        self.renormalize();
        self.why
            .push("Book-like equality (drawish opening)".to_string());
    }

    /// Returns whether the triple was overridden.
    fn mate_override(&mut self, mate: i32, time_control: TimeControl) -> bool {
        let cap = time_control.mate_cap();
        if mate > 0 {
            self.p.white = self.p.white.max(cap);
            self.p.draw = 1.0 - self.p.white;
            self.p.black = MATE_LOSER_PLACEHOLDER;
        } else if mate < 0 {
            self.p.black = self.p.black.max(cap);
            self.p.draw = 1.0 - self.p.black;
            self.p.white = MATE_LOSER_PLACEHOLDER;
        }
        self.renormalize();
        self.why.push(format!("Mate in {} detected", mate.unsigned_abs()));
        mate != 0
    }

    /// Bound the published triple. After a mate override only the ceiling
    /// applies, so the floors cannot pull the mating side back under its cap.
    fn final_clamp(&mut self, mate_override: bool) {
        self.p = if mate_override {
            // Losing side and draw may end below their floors here
            self.p.clamped([0.0; 3], [CEILING; 3])
        } else {
            self.p
                .clamped([SIDE_FLOOR, DRAW_FLOOR, SIDE_FLOOR], [CEILING; 3])
        };
    }
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Population standard deviation; 0 for an empty slice.
fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}
