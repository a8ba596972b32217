//! Outcome probability analysis
//!
//! Runs one Stockfish search over a position and prints every published
//! state as a JSON line on stdout.

use tracing::{info, warn};

use analysis_engine::chess_core::PositionSnapshot;
use analysis_engine::config::AnalysisConfig;
use analysis_engine::error::EngineError;
use analysis_engine::session::{AnalysisSession, PublishedState, SessionUpdate};
use analysis_engine::stockfish::{spawn_engine, EngineCommand, EngineHandle};
use analysis_engine::variations::VariationRecord;

/// Value following `flag` on the command line, if present.
fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Build the position from --fen <FEN> and --moves e2e4,e7e5
fn parse_position(args: &[String]) -> Result<PositionSnapshot, EngineError> {
    let mut position = match arg_value(args, "--fen") {
        Some(fen) => PositionSnapshot::from_fen(&fen)?,
        None => PositionSnapshot::startpos(),
    };

    if let Some(moves) = arg_value(args, "--moves") {
        for mv in moves.split(',').map(str::trim).filter(|m| !m.is_empty()) {
            position.play_uci(mv)?;
        }
    }
    Ok(position)
}

fn print_state(state: &PublishedState) -> anyhow::Result<()> {
    println!("{}", state.to_json_line()?);
    Ok(())
}

fn send_all(engine: &EngineHandle, commands: Vec<EngineCommand>) -> anyhow::Result<()> {
    for command in commands {
        engine.send(command)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let config = AnalysisConfig::load()?;
    let args: Vec<String> = std::env::args().collect();
    let position = parse_position(&args)?;
    info!(fen = %position.fen(), plies = position.ply_count(), "Analysing position");

    let mut session = AnalysisSession::new(config.settings(), config.go_params());
    let mut engine = spawn_engine(&config.stockfish_path, config.engine_options());
    let mut published_any = false;

    if let Err(e) = engine.send(EngineCommand::Init) {
        warn!(error = %e, "Engine unavailable");
    }

    while let Some(event) = engine.next_event().await {
        match session.handle_event(&event) {
            SessionUpdate::Ready => {
                send_all(&engine, session.change_position(position.clone()))?;
            }
            SessionUpdate::Published => {
                print_state(session.published())?;
                published_any = true;
            }
            SessionUpdate::Resume(commands) => send_all(&engine, commands)?,
            SessionUpdate::BestMove(best_move) => {
                let best_score = session
                    .published()
                    .variations
                    .first()
                    .map(VariationRecord::score_label)
                    .unwrap_or_default();
                info!(
                    best_move = %best_move,
                    score = %best_score,
                    headline = %session.published().headline(),
                    "Analysis complete"
                );
                engine.send(EngineCommand::Quit)?;
                break;
            }
            SessionUpdate::Log(message) => warn!(message = %message, "Engine"),
            SessionUpdate::Merged | SessionUpdate::Ignored => {}
        }
    }

    // Engine never produced anything: show the neutral state
    if !published_any {
        print_state(session.published())?;
    }

    // Let the actor deliver `quit` before the runtime shuts down
    while engine.next_event().await.is_some() {}

    Ok(())
}
