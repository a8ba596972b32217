//! Stockfish engine actor speaking UCI (async I/O)
//!
//! The engine process is owned by a single task. Callers talk to it through
//! an `EngineHandle`: commands go in on one channel, events come out on the
//! other in exactly the order the process wrote them.

use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use chess_core::BasePosition;

use crate::error::EngineError;
use crate::uci::{self, EngineLine, ParsedUpdate};

/// Requests for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// UCI handshake followed by analysis option setup
    Init,
    NewGame,
    Stop,
    Quit,
    SetPosition {
        base: BasePosition,
        /// Moves since `base` in UCI notation
        moves: Vec<String>,
    },
    Go(GoParams),
    SetOption {
        name: String,
        value: String,
    },
}

/// Search limits for `go`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoParams {
    pub depth: Option<u32>,
    pub movetime_ms: Option<u64>,
    /// Ranked variations to report, applied as the MultiPV option
    pub multipv: Option<u32>,
}

/// Options applied once during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub threads: u32,
    pub hash_mb: u32,
    pub multipv: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            hash_mb: 256,
            multipv: 5,
        }
    }
}

impl EngineOptions {
    fn setup_commands(&self) -> Vec<String> {
        vec![
            set_option("Threads", self.threads),
            set_option("Hash", self.hash_mb),
            set_option("UCI_AnalyseMode", true),
            set_option("MultiPV", self.multipv),
            set_option("UCI_ShowWDL", true),
        ]
    }
}

/// What the engine reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Handshake finished (`readyok` received)
    Ready,
    /// Diagnostic message from the actor itself
    Log(String),
    /// Every non-empty output line, verbatim
    Line(String),
    Parsed(ParsedUpdate),
    BestMove(String),
}

fn set_option(name: &str, value: impl std::fmt::Display) -> String {
    format!("setoption name {name} value {value}")
}

impl EngineCommand {
    /// Protocol lines for this command. `Init` is a multi-step handshake
    /// driven by the actor and has no fixed text.
    pub fn to_uci(&self) -> Vec<String> {
        match self {
            EngineCommand::Init => Vec::new(),
            EngineCommand::NewGame => vec!["ucinewgame".to_string()],
            EngineCommand::Stop => vec!["stop".to_string()],
            EngineCommand::Quit => vec!["quit".to_string()],
            EngineCommand::SetPosition { base, moves } => {
                let mut cmd = match base {
                    BasePosition::StartPos => "position startpos".to_string(),
                    BasePosition::Fen(fen) => format!("position fen {fen}"),
                };
                if !moves.is_empty() {
                    cmd.push_str(" moves ");
                    cmd.push_str(&moves.join(" "));
                }
                vec![cmd]
            }
            EngineCommand::Go(params) => {
                let mut lines = Vec::new();
                if let Some(multipv) = params.multipv {
                    lines.push(set_option("MultiPV", multipv));
                }
                let mut go = String::from("go");
                if let Some(depth) = params.depth {
                    go.push_str(&format!(" depth {depth}"));
                }
                if let Some(movetime) = params.movetime_ms {
                    go.push_str(&format!(" movetime {movetime}"));
                }
                if params.depth.is_none() && params.movetime_ms.is_none() {
                    go.push_str(" infinite");
                }
                lines.push(go);
                lines
            }
            EngineCommand::SetOption { name, value } => vec![set_option(name, value)],
        }
    }
}

/// Caller's side of the engine actor.
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::Stockfish("Engine task has stopped".into()))
    }

    /// Next event, or `None` once the actor has shut down.
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.events.recv().await
    }
}

/// Spawn the Stockfish process and its actor task. A spawn failure is
/// reported as a single `Log` event, after which the event stream ends.
pub fn spawn_engine(path: &str, options: EngineOptions) -> EngineHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let spawned = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::Stockfish(format!("Failed to spawn Stockfish: {e}")))
        .and_then(|mut child| {
            let stdin = child.stdin.take();
            let stdout = child.stdout.take();
            match (stdin, stdout) {
                (Some(stdin), Some(stdout)) => Ok((child, stdin, stdout)),
                _ => Err(EngineError::Stockfish("Stockfish pipes unavailable".into())),
            }
        });

    match spawned {
        Ok((mut child, stdin, stdout)) => {
            info!(path, "Stockfish process started");
            tokio::spawn(async move {
                let result = run_engine(
                    BufReader::new(stdout),
                    stdin,
                    options,
                    command_rx,
                    event_tx.clone(),
                )
                .await;
                if let Err(e) = result {
                    error!(error = %e, "Engine actor stopped");
                    let _ = event_tx.send(EngineEvent::Log(e.to_string()));
                    let _ = child.start_kill();
                }
                let _ = child.wait().await;
            });
        }
        Err(e) => {
            error!(path, error = %e, "Engine unavailable");
            let _ = event_tx.send(EngineEvent::Log(e.to_string()));
        }
    }

    EngineHandle {
        commands: command_tx,
        events: event_rx,
    }
}

/// Actor loop over an engine's output (`reader`) and input (`writer`).
/// Returns once `Quit` was sent, the command channel closed, or the engine
/// closed its output.
pub async fn run_engine<R, W>(
    reader: R,
    writer: W,
    options: EngineOptions,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    events: mpsc::UnboundedSender<EngineEvent>,
) -> Result<(), EngineError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stream = UciStream {
        lines: reader.lines(),
        writer,
        events,
    };

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(EngineCommand::Init) => stream.handshake(&options).await?,
                Some(EngineCommand::Quit) | None => {
                    stream.send("quit").await?;
                    return Ok(());
                }
                Some(command) => {
                    for line in command.to_uci() {
                        stream.send(&line).await?;
                    }
                }
            },
            line = stream.lines.next_line() => match line.map_err(read_error)? {
                Some(line) => stream.forward(&line),
                None => {
                    info!("Stockfish closed its output");
                    stream.emit(EngineEvent::Log("Engine output closed".into()));
                    return Ok(());
                }
            },
        }
    }
}

fn read_error(e: std::io::Error) -> EngineError {
    EngineError::Stockfish(format!("Failed to read from Stockfish: {e}"))
}

struct UciStream<R, W> {
    lines: Lines<R>,
    writer: W,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl<R, W> UciStream<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn send(&mut self, cmd: &str) -> Result<(), EngineError> {
        debug!(cmd, "SF <");
        self.writer
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| EngineError::Stockfish(format!("Failed to write to Stockfish: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| EngineError::Stockfish(format!("Failed to flush stdin: {e}")))?;
        Ok(())
    }

    /// Read until `expected`, forwarding everything read on the way.
    async fn wait_for(&mut self, expected: &str) -> Result<(), EngineError> {
        loop {
            match self.lines.next_line().await.map_err(read_error)? {
                Some(line) => {
                    let done = line.trim() == expected;
                    self.forward(&line);
                    if done {
                        return Ok(());
                    }
                }
                None => {
                    return Err(EngineError::Stockfish(format!(
                        "Stockfish exited before sending {expected}"
                    )))
                }
            }
        }
    }

    async fn handshake(&mut self, options: &EngineOptions) -> Result<(), EngineError> {
        self.send("uci").await?;
        self.wait_for("uciok").await?;
        for cmd in options.setup_commands() {
            self.send(&cmd).await?;
        }
        self.send("isready").await?;
        self.wait_for("readyok").await?;
        self.emit(EngineEvent::Ready);
        Ok(())
    }

    fn forward(&self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        debug!(line = trimmed, "SF >");
        self.emit(EngineEvent::Line(trimmed.to_string()));
        match uci::parse_line(trimmed) {
            EngineLine::Info(update) => self.emit(EngineEvent::Parsed(update)),
            EngineLine::BestMove(mv) => self.emit(EngineEvent::BestMove(mv)),
            EngineLine::Other => {}
        }
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening any more; the caller is shutting down
        let _ = self.events.send(event);
    }
}
