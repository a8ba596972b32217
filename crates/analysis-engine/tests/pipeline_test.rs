//! End-to-end scenarios: a scripted engine behind the actor, driven by a
//! session the same way the binary drives it.

use analysis_engine::chess_core::PositionSnapshot;
use analysis_engine::pom::{self, OutcomeProbabilities, TimeControl};
use analysis_engine::session::{AnalysisSession, AnalysisSettings, PublishedState, SessionUpdate};
use analysis_engine::stockfish::{run_engine, EngineCommand, EngineEvent, EngineOptions, GoParams};
use analysis_engine::uci::ParsedUpdate;
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Answers the handshake and replies to every `go` with `search_output`.
async fn scripted_engine(io: DuplexStream, search_output: &'static str) {
    let (read, mut write) = split(io);
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match line.split_whitespace().next() {
            Some("uci") => "id name Scripted\nuciok\n",
            Some("isready") => "readyok\n",
            Some("go") => search_output,
            Some("quit") => return,
            _ => continue,
        };
        write.write_all(reply.as_bytes()).await.unwrap();
        write.flush().await.unwrap();
    }
}

/// Run one search of `position` and collect every published state.
async fn analyse(
    position: PositionSnapshot,
    settings: AnalysisSettings,
    search_output: &'static str,
) -> (Vec<PublishedState>, String) {
    let (actor_io, engine_io) = duplex(16 * 1024);
    let engine = tokio::spawn(scripted_engine(engine_io, search_output));

    let (read, write) = split(actor_io);
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let options = EngineOptions {
        threads: 1,
        hash_mb: 16,
        multipv: 3,
    };
    let actor = tokio::spawn(run_engine(BufReader::new(read), write, options, command_rx, event_tx));

    let go = GoParams {
        depth: Some(12),
        movetime_ms: None,
        multipv: Some(3),
    };
    let mut session = AnalysisSession::new(settings, go);
    let mut published = Vec::new();
    let mut best_move = String::new();

    command_tx.send(EngineCommand::Init).unwrap();
    while let Some(event) = event_rx.recv().await {
        match session.handle_event(&event) {
            SessionUpdate::Ready => {
                for command in session.change_position(position.clone()) {
                    command_tx.send(command).unwrap();
                }
            }
            SessionUpdate::Published => published.push(session.published().clone()),
            SessionUpdate::BestMove(mv) => {
                best_move = mv;
                command_tx.send(EngineCommand::Quit).unwrap();
                break;
            }
            _ => {}
        }
    }

    actor.await.unwrap().unwrap();
    engine.await.unwrap();
    (published, best_move)
}

fn assert_valid(p: &OutcomeProbabilities) {
    assert!((p.sum() - 1.0).abs() < 1e-6, "{p:?}");
    for v in p.to_array() {
        assert!((0.0..=1.0).contains(&v), "{p:?}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

const OPENING_SEARCH: &str = "\
info depth 8 multipv 1 score cp 20 wdl 80 860 60 nps 400000 pv e2e4 e7e5
info depth 8 multipv 2 score cp 12 pv d2d4 d7d5
info depth 8 multipv 3 score cp 5 pv g1f3 g8f6
info string NNUE evaluation enabled
info depth 12 multipv 1 score cp 28 wdl 90 850 60 pv e2e4 c7c5
info depth 12 multipv 2 score cp 15
bestmove e2e4 ponder c7c5
";

#[tokio::test]
async fn test_opening_search_end_to_end() {
    let (published, best_move) =
        analyse(PositionSnapshot::startpos(), AnalysisSettings::default(), OPENING_SEARCH).await;

    assert_eq!(best_move, "e2e4");
    // Every update that touched rank 1 or came after it
    assert_eq!(published.len(), 5);
    for state in &published {
        assert_valid(&state.probabilities);
        assert!(state.explanations.len() <= 4);
        assert_eq!(state.explanations[0], "Engine WDL baseline");
    }

    let last = published.last().unwrap();
    assert_eq!(last.depth, Some(12));
    assert_eq!(last.best_eval_cp, Some(28));
    assert_eq!(last.variations.len(), 3);
    // Rank 2 kept its PV from depth 8 and took the new score
    assert_eq!(last.variations[1].cp, Some(15));
    assert_eq!(
        last.variations[1].pv,
        Some(vec!["d2d4".to_string(), "d7d5".to_string()])
    );
    assert!(last.probabilities.draw > 0.5);
}

const BLACK_TO_MOVE_SEARCH: &str = "\
info depth 10 multipv 1 score cp 150 wdl 400 550 50 pv c7c5
bestmove c7c5
";

#[tokio::test]
async fn test_scores_reported_for_black_are_flipped() {
    let mut position = PositionSnapshot::startpos();
    position.play_uci("e2e4").unwrap();

    let (published, _) =
        analyse(position, AnalysisSettings::default(), BLACK_TO_MOVE_SEARCH).await;

    let state = published.last().unwrap();
    assert_eq!(state.best_eval_cp, Some(-150));
    assert_eq!(state.variations[0].wdl, Some([50, 550, 400]));
    assert!(state.probabilities.black > state.probabilities.white);
}

const MATE_SEARCH: &str = "\
info depth 14 multipv 1 score mate 3 pv a1a8
info depth 14 multipv 2 score cp 310 pv a1a7
bestmove a1a8
";

#[tokio::test]
async fn test_blitz_mate_in_three() {
    let position = PositionSnapshot::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
    let settings = AnalysisSettings {
        time_control: TimeControl::Blitz,
        explanation_limit: 10,
        ..Default::default()
    };

    let (published, best_move) = analyse(position, settings, MATE_SEARCH).await;
    assert_eq!(best_move, "a1a8");

    let first = &published[0];
    assert!(first.probabilities.white >= 0.97 / 1.001 - 1e-6);
    assert_eq!(first.best_mate, Some(3));
    assert_eq!(
        first.explanations.last().map(String::as_str),
        Some("Mate in 3 detected")
    );
    assert_valid(&first.probabilities);
}

#[test]
fn test_start_position_base_stage() {
    let p = pom::base_mapping(Some(0), None, TimeControl::Rapid);
    assert!((p.draw - 0.33).abs() < 1e-6);
    assert!((p.white - 0.335).abs() < 1e-6);
    assert!((p.black - 0.335).abs() < 1e-6);
}

#[test]
fn test_neutral_state_before_any_update() {
    let session = AnalysisSession::new(AnalysisSettings::default(), GoParams::default());
    let state = session.published();
    assert_eq!(state.probabilities, OutcomeProbabilities::new(0.33, 0.34, 0.33));
    assert_eq!(state.headline(), "White 33.0% | Draw 34.0% | Black 33.0%");
}

#[test]
fn test_stale_search_updates_never_published() {
    let go = GoParams {
        depth: Some(10),
        ..Default::default()
    };
    let mut session = AnalysisSession::new(AnalysisSettings::default(), go);
    session.start_search();

    let mut next = PositionSnapshot::startpos();
    next.play_uci("g1f3").unwrap();
    assert_eq!(session.change_position(next), vec![EngineCommand::Stop]);

    let stale = EngineEvent::Parsed(ParsedUpdate {
        multipv: Some(1),
        depth: Some(30),
        cp: Some(900),
        ..Default::default()
    });
    assert_eq!(session.handle_event(&stale), SessionUpdate::Ignored);
    assert!(session.published().variations.is_empty());
}
