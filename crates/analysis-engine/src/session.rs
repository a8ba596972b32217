//! Analysis session
//!
//! Single owner of everything that changes while a position is analysed:
//! the merged variations, the smoother, the previous evaluation and the
//! published state. Engine events are fed in one at a time by whoever drains
//! the event channel; the session answers with the engine commands to send.

use serde::Serialize;
use shakmaty::Color;
use tracing::{debug, info};

use chess_core::PositionSnapshot;

use crate::error::EngineError;
use crate::pom::{self, OutcomeProbabilities, PomInputs, TimeControl};
use crate::smoother::Smoother;
use crate::stockfish::{EngineCommand, EngineEvent, GoParams};
use crate::uci::ParsedUpdate;
use crate::variations::{VariationRecord, VariationStore};

/// Game context for the probability model.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    pub white_elo: i32,
    pub black_elo: i32,
    pub time_control: TimeControl,
    pub use_book_heuristics: bool,
    /// Explanations kept when publishing
    pub explanation_limit: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            white_elo: 1800,
            black_elo: 1800,
            time_control: TimeControl::Rapid,
            use_book_heuristics: true,
            explanation_limit: 4,
        }
    }
}

/// What observers see. Scores are from White's perspective.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedState {
    pub probabilities: OutcomeProbabilities,
    pub explanations: Vec<String>,
    pub depth: Option<u32>,
    pub best_eval_cp: Option<i32>,
    pub best_mate: Option<i32>,
    pub variations: Vec<VariationRecord>,
}

impl Default for PublishedState {
    fn default() -> Self {
        Self {
            probabilities: OutcomeProbabilities::neutral(),
            explanations: Vec::new(),
            depth: None,
            best_eval_cp: None,
            best_mate: None,
            variations: Vec::new(),
        }
    }
}

impl PublishedState {
    pub fn headline(&self) -> String {
        self.probabilities.headline()
    }

    pub fn to_json_line(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Result of feeding one engine event to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Engine handshake finished
    Ready,
    /// `published()` changed
    Published,
    /// Merged, but there is no best line to evaluate yet
    Merged,
    /// The current search finished
    BestMove(String),
    /// A stopped search finished; send these to start the pending one
    Resume(Vec<EngineCommand>),
    Log(String),
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Search {
    Idle,
    Running,
    /// `stop` sent, waiting for the engine's `bestmove`
    Stopping { restart: Option<Restart> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Restart {
    new_game: bool,
}

pub struct AnalysisSession {
    settings: AnalysisSettings,
    go: GoParams,
    position: PositionSnapshot,
    store: VariationStore,
    smoother: Smoother,
    previous_eval_cp: Option<i32>,
    search: Search,
    published: PublishedState,
}

impl AnalysisSession {
    pub fn new(settings: AnalysisSettings, go: GoParams) -> Self {
        Self {
            settings,
            go,
            position: PositionSnapshot::startpos(),
            store: VariationStore::new(),
            smoother: Smoother::new(),
            previous_eval_cp: None,
            search: Search::Idle,
            published: PublishedState::default(),
        }
    }

    pub fn published(&self) -> &PublishedState {
        &self.published
    }

    pub fn is_searching(&self) -> bool {
        self.search != Search::Idle
    }

    /// Commands that start (or schedule) a search of the current position.
    pub fn start_search(&mut self) -> Vec<EngineCommand> {
        self.schedule(Restart { new_game: false })
    }

    /// Switch to a new position. Everything learned about the old one is
    /// dropped before the new search is scheduled.
    pub fn change_position(&mut self, position: PositionSnapshot) -> Vec<EngineCommand> {
        self.reset_for(position);
        self.start_search()
    }

    /// Back to the start position, as a fresh game.
    pub fn new_game(&mut self) -> Vec<EngineCommand> {
        self.reset_for(PositionSnapshot::startpos());
        self.previous_eval_cp = None;
        self.schedule(Restart { new_game: true })
    }

    /// Ask the engine to stop. Updates already in flight still count.
    pub fn stop(&mut self) -> Vec<EngineCommand> {
        match self.search {
            Search::Running => {
                self.search = Search::Stopping { restart: None };
                vec![EngineCommand::Stop]
            }
            Search::Stopping { .. } => {
                self.search = Search::Stopping { restart: None };
                Vec::new()
            }
            Search::Idle => Vec::new(),
        }
    }

    pub fn handle_event(&mut self, event: &EngineEvent) -> SessionUpdate {
        match event {
            EngineEvent::Ready => SessionUpdate::Ready,
            EngineEvent::Log(message) => SessionUpdate::Log(message.clone()),
            EngineEvent::Line(_) => SessionUpdate::Ignored,
            EngineEvent::Parsed(update) => match self.search {
                Search::Running | Search::Stopping { restart: None } => self.apply(update),
                // Belongs to the position we just left
                Search::Stopping { restart: Some(_) } | Search::Idle => SessionUpdate::Ignored,
            },
            EngineEvent::BestMove(best_move) => match self.search {
                Search::Stopping {
                    restart: Some(restart),
                } => {
                    debug!(best_move = %best_move, "Stopped search finished, starting pending search");
                    self.search = Search::Running;
                    SessionUpdate::Resume(self.search_commands(restart))
                }
                Search::Running | Search::Stopping { restart: None } => {
                    self.search = Search::Idle;
                    info!(best_move = %best_move, headline = %self.published.headline(), "Search finished");
                    SessionUpdate::BestMove(best_move.clone())
                }
                Search::Idle => SessionUpdate::Ignored,
            },
        }
    }

    fn reset_for(&mut self, position: PositionSnapshot) {
        self.position = position;
        self.store.clear();
        self.smoother.reset();
        self.published = PublishedState::default();
    }

    fn schedule(&mut self, restart: Restart) -> Vec<EngineCommand> {
        match self.search {
            Search::Idle => {
                self.search = Search::Running;
                self.search_commands(restart)
            }
            Search::Running => {
                self.search = Search::Stopping {
                    restart: Some(restart),
                };
                vec![EngineCommand::Stop]
            }
            Search::Stopping { restart: pending } => {
                let new_game = restart.new_game || pending.is_some_and(|p| p.new_game);
                self.search = Search::Stopping {
                    restart: Some(Restart { new_game }),
                };
                Vec::new()
            }
        }
    }

    fn search_commands(&self, restart: Restart) -> Vec<EngineCommand> {
        let mut commands = Vec::with_capacity(3);
        if restart.new_game {
            commands.push(EngineCommand::NewGame);
        }
        commands.push(EngineCommand::SetPosition {
            base: self.position.base().clone(),
            moves: self.position.moves().to_vec(),
        });
        commands.push(EngineCommand::Go(self.go.clone()));
        commands
    }

    fn apply(&mut self, update: &ParsedUpdate) -> SessionUpdate {
        let update = white_perspective(update, self.position.turn());
        if self.store.apply(&update).is_none() {
            return SessionUpdate::Ignored;
        }
        let Some(best) = self.store.best().cloned() else {
            return SessionUpdate::Merged;
        };

        let variations = self.store.variations();
        let inputs = PomInputs {
            eval_cp: best.cp,
            engine_wdl: best.wdl,
            variations: &variations,
            legal_moves: self.position.legal_move_count(),
            white_elo: self.settings.white_elo,
            black_elo: self.settings.black_elo,
            time_control: self.settings.time_control,
            features: self.position.features(),
            ply_count: self.position.ply_count(),
            previous_eval_cp: self.previous_eval_cp,
            use_book_heuristics: self.settings.use_book_heuristics,
        };
        let output = pom::compute(&inputs);

        if best.cp.is_some() {
            self.previous_eval_cp = best.cp;
        }
        let probabilities = self
            .smoother
            .update(output.probabilities, best.depth.unwrap_or(0));

        let mut explanations = output.explanations;
        explanations.truncate(self.settings.explanation_limit);

        self.published = PublishedState {
            probabilities,
            explanations,
            depth: best.depth,
            best_eval_cp: best.cp,
            best_mate: best.mate,
            variations,
        };
        SessionUpdate::Published
    }
}

/// Engines score from the side to move; the store wants White-positive.
fn white_perspective(update: &ParsedUpdate, turn: Color) -> ParsedUpdate {
    let mut update = update.clone();
    if turn == Color::Black {
        update.cp = update.cp.map(i32::saturating_neg);
        update.mate = update.mate.map(i32::saturating_neg);
        update.wdl = update.wdl.map(|[w, d, l]| [l, d, w]);
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_core::BasePosition;

    fn go() -> GoParams {
        GoParams {
            depth: Some(18),
            movetime_ms: None,
            multipv: Some(3),
        }
    }

    fn info(multipv: u32, depth: u32, cp: i32) -> EngineEvent {
        EngineEvent::Parsed(ParsedUpdate {
            multipv: Some(multipv),
            depth: Some(depth),
            cp: Some(cp),
            pv: Some(vec!["e2e4".into()]),
            ..Default::default()
        })
    }

    fn session() -> AnalysisSession {
        AnalysisSession::new(AnalysisSettings::default(), go())
    }

    #[test]
    fn test_default_published_state_is_neutral() {
        let s = session();
        assert_eq!(s.published().probabilities, OutcomeProbabilities::new(0.33, 0.34, 0.33));
        assert!(s.published().explanations.is_empty());
        assert!(!s.is_searching());
    }

    #[test]
    fn test_start_search_from_idle() {
        let mut s = session();
        let commands = s.start_search();
        assert_eq!(
            commands,
            vec![
                EngineCommand::SetPosition {
                    base: BasePosition::StartPos,
                    moves: vec![],
                },
                EngineCommand::Go(go()),
            ]
        );
        assert!(s.is_searching());
    }

    #[test]
    fn test_parsed_update_publishes() {
        let mut s = session();
        s.start_search();
        assert_eq!(s.handle_event(&info(1, 10, 35)), SessionUpdate::Published);

        let published = s.published();
        assert_eq!(published.depth, Some(10));
        assert_eq!(published.best_eval_cp, Some(35));
        assert_eq!(published.variations.len(), 1);
        assert!((published.probabilities.sum() - 1.0).abs() < 1e-6);
        assert!(published.probabilities.white > published.probabilities.black);
        assert!(published.explanations.len() <= 4);
    }

    #[test]
    fn test_secondary_line_before_best_is_only_merged() {
        let mut s = session();
        s.start_search();
        assert_eq!(s.handle_event(&info(2, 10, -15)), SessionUpdate::Merged);
        assert_eq!(s.published(), &PublishedState::default());
    }

    #[test]
    fn test_update_without_rank_ignored() {
        let mut s = session();
        s.start_search();
        let event = EngineEvent::Parsed(ParsedUpdate {
            depth: Some(5),
            cp: Some(10),
            ..Default::default()
        });
        assert_eq!(s.handle_event(&event), SessionUpdate::Ignored);
    }

    #[test]
    fn test_black_to_move_scores_flipped() {
        let mut s = session();
        let mut position = PositionSnapshot::startpos();
        position.play_uci("e2e4").unwrap();
        s.change_position(position);

        let event = EngineEvent::Parsed(ParsedUpdate {
            multipv: Some(1),
            depth: Some(12),
            cp: Some(30),
            wdl: Some([200, 700, 100]),
            ..Default::default()
        });
        s.handle_event(&event);

        let best = &s.published().variations[0];
        assert_eq!(best.cp, Some(-30));
        assert_eq!(best.wdl, Some([100, 700, 200]));
        assert_eq!(s.published().best_eval_cp, Some(-30));
    }

    #[test]
    fn test_position_change_during_search_drops_stale_updates() {
        let mut s = session();
        s.start_search();
        s.handle_event(&info(1, 14, 40));

        let mut position = PositionSnapshot::startpos();
        position.play_uci("d2d4").unwrap();
        assert_eq!(s.change_position(position), vec![EngineCommand::Stop]);
        assert_eq!(s.published(), &PublishedState::default());

        // Still from the old search
        assert_eq!(s.handle_event(&info(1, 15, 45)), SessionUpdate::Ignored);
        assert_eq!(s.published(), &PublishedState::default());

        let update = s.handle_event(&EngineEvent::BestMove("e2e4".into()));
        assert_eq!(
            update,
            SessionUpdate::Resume(vec![
                EngineCommand::SetPosition {
                    base: BasePosition::StartPos,
                    moves: vec!["d2d4".into()],
                },
                EngineCommand::Go(go()),
            ])
        );

        // Fresh search: smoother was reset, so depth 3 is accepted raw
        assert_eq!(s.handle_event(&info(1, 3, -20)), SessionUpdate::Published);
        assert_eq!(s.published().depth, Some(3));
        assert_eq!(s.published().best_eval_cp, Some(20));
    }

    #[test]
    fn test_stop_keeps_in_flight_updates() {
        let mut s = session();
        s.start_search();
        assert_eq!(s.stop(), vec![EngineCommand::Stop]);
        assert_eq!(s.handle_event(&info(1, 20, 15)), SessionUpdate::Published);
        assert_eq!(
            s.handle_event(&EngineEvent::BestMove("g1f3".into())),
            SessionUpdate::BestMove("g1f3".into())
        );
        assert!(!s.is_searching());
        assert!(s.stop().is_empty());
    }

    #[test]
    fn test_new_game_while_idle() {
        let mut s = session();
        s.start_search();
        s.handle_event(&info(1, 12, 80));
        s.handle_event(&EngineEvent::BestMove("e2e4".into()));

        let commands = s.new_game();
        assert_eq!(commands[0], EngineCommand::NewGame);
        assert_eq!(commands.len(), 3);
        assert_eq!(s.previous_eval_cp, None);
    }

    #[test]
    fn test_new_game_while_searching_waits_for_bestmove() {
        let mut s = session();
        s.start_search();
        assert_eq!(s.new_game(), vec![EngineCommand::Stop]);
        match s.handle_event(&EngineEvent::BestMove("e2e4".into())) {
            SessionUpdate::Resume(commands) => assert_eq!(commands[0], EngineCommand::NewGame),
            other => panic!("expected resume, got {other:?}"),
        }
    }

    #[test]
    fn test_explanations_truncated() {
        let settings = AnalysisSettings {
            white_elo: 2400,
            explanation_limit: 1,
            ..Default::default()
        };
        let mut s = AnalysisSession::new(settings, go());
        s.start_search();
        s.handle_event(&info(1, 10, 0));
        assert_eq!(s.published().explanations, vec!["Evaluation-based baseline".to_string()]);
    }

    #[test]
    fn test_deeper_updates_are_smoothed() {
        let mut s = session();
        s.start_search();
        s.handle_event(&info(1, 10, 0));
        let first = s.published().probabilities;
        s.handle_event(&info(1, 12, 600));
        let second = s.published().probabilities;

        let mut raw = session();
        raw.start_search();
        raw.handle_event(&info(1, 12, 600));
        let unsmoothed = raw.published().probabilities;

        assert!(second.white > first.white);
        assert!(second.white < unsmoothed.white);
    }

    #[test]
    fn test_extreme_engine_scores_are_published() {
        for line in [
            "info depth 5 multipv 1 score cp -2147483648",
            "info depth 5 multipv 1 score mate -2147483648",
        ] {
            let event = EngineEvent::Parsed(crate::uci::parse_info(line).unwrap());

            // White to move
            let mut s = session();
            s.start_search();
            assert_eq!(s.handle_event(&event), SessionUpdate::Published);
            assert!((s.published().probabilities.sum() - 1.0).abs() < 1e-6);

            // Black to move: the score flips and saturates
            let mut s = session();
            let mut position = PositionSnapshot::startpos();
            position.play_uci("e2e4").unwrap();
            s.change_position(position);
            assert_eq!(s.handle_event(&event), SessionUpdate::Published);
            let best = &s.published().variations[0];
            assert!(best.cp == Some(i32::MAX) || best.mate == Some(i32::MAX));
        }
    }

    #[test]
    fn test_eval_swing_across_whole_range() {
        let mut s = session();
        s.start_search();
        assert_eq!(s.handle_event(&info(1, 10, 2_000_000_000)), SessionUpdate::Published);
        assert_eq!(s.handle_event(&info(1, 11, -2_000_000_000)), SessionUpdate::Published);
        let p = s.published().probabilities;
        assert!((p.sum() - 1.0).abs() < 1e-6);
        assert_eq!(s.published().best_eval_cp, Some(-2_000_000_000));
    }

    #[test]
    fn test_published_state_json() {
        let s = session();
        let json = s.published().to_json_line().unwrap();
        assert!(json.starts_with("{\"probabilities\":{\"white\":0.33"));
        assert!(!json.contains('\n'));
    }
}
