#![forbid(unsafe_code)]

//! `agent-session-runner`: run and inspect supervised agent sessions.
//!
//! Loads configuration, reconciles sessions orphaned by an earlier crash,
//! and either drives a session interactively or reads persisted sessions.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_session_runner::models::event::{EventType, SessionEvent};
use agent_session_runner::models::session::{RunnerMode, RunnerState};
use agent_session_runner::orchestrator::recover_orphans;
use agent_session_runner::persistence::{EventFollower, EventLog, MetadataStore};
use agent_session_runner::{AppError, GlobalConfig, Result, SessionManager, SessionRequest};

/// How often `events --follow` re-reads without a change notification.
const FOLLOW_FALLBACK: Duration = Duration::from_secs(1);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
#[value(rename_all = "snake_case")]
enum ModeArg {
    PerTurn,
    LongLived,
}

impl From<ModeArg> for RunnerMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::PerTurn => Self::PerTurn,
            ModeArg::LongLived => Self::LongLived,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "agent-session-runner", about = "Supervised agent CLI sessions", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json). Logs go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a session and stream its events as NDJSON on stdout.
    ///
    /// Each stdin line is sent as a follow-up message once the session is
    /// waiting for input.
    Run {
        /// Project the session belongs to.
        #[arg(long)]
        project: String,

        /// Turn strategy; the configured default when omitted.
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Per-turn timeout in seconds.
        #[arg(long)]
        turn_timeout: Option<u64>,

        /// Initial prompt.
        prompt: String,
    },
    /// Print every persisted session's metadata as NDJSON.
    List,
    /// Print a session's events as NDJSON.
    Events {
        /// Session to read.
        session_id: String,

        /// First event id to print.
        #[arg(long, default_value_t = 0)]
        from: u64,

        /// Keep printing new events until the session ends.
        #[arg(long)]
        follow: bool,
    },
    /// Reconcile sessions left running by a previous host process.
    ///
    /// Sessions whose recorded host process is still running are skipped.
    Recover,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    let store = MetadataStore::open(config.sessions_dir())?;

    match args.command {
        Command::Run {
            project,
            mode,
            turn_timeout,
            prompt,
        } => {
            let request = SessionRequest {
                project_id: project,
                prompt,
                mode: mode.map(RunnerMode::from),
                turn_timeout: turn_timeout.map(Duration::from_secs),
            };
            run_session(&config, store, request).await
        }
        Command::List => {
            for meta in store.list()? {
                print_json(&meta)?;
            }
            Ok(())
        }
        Command::Events {
            session_id,
            from,
            follow,
        } => print_events(&store, &session_id, from, follow).await,
        Command::Recover => {
            let report = recover_orphans(&store, |_| false)?;
            for session_id in &report.reconciled {
                println!("reconciled {session_id}");
            }
            for (session_id, reason) in &report.failures {
                println!("failed {session_id}: {reason}");
            }
            Ok(())
        }
    }
}

async fn run_session(config: &GlobalConfig, store: MetadataStore, request: SessionRequest) -> Result<()> {
    let manager = SessionManager::bootstrap(config.runner_settings(), store.clone())?;
    let recovered = manager.recovery_report().reconciled.len();
    if recovered > 0 {
        info!(recovered, "reconciled sessions interrupted by a previous run");
    }

    let handle = manager.start_session(request).await?;
    let session_id = handle.session_id().to_owned();
    let events_path = store.events_path(&session_id);
    info!(session_id = session_id.as_str(), "session running");

    // Subscribe first, then catch up from the log, so nothing falls between.
    let mut events = handle.subscribe();
    let mut printed: Option<u64> = None;
    print_backlog(&events_path, &mut printed)?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut pending: VecDeque<String> = VecDeque::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut stopping = false;

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    let ready = event.kind == EventType::WaitingForInput;
                    print_event(&event, &mut printed)?;
                    if ready {
                        if let Some(text) = pending.pop_front() {
                            send(&manager, &session_id, text).await;
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event stream lagged, catching up from the log");
                    print_backlog(&events_path, &mut printed)?;
                }
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(text)) if text.trim().is_empty() => {}
                Ok(Some(text)) => {
                    if pending.is_empty() && handle.get_metadata().state == RunnerState::Idle {
                        send(&manager, &session_id, text).await;
                    } else {
                        pending.push_back(text);
                    }
                }
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!(%err, "stdin read failed, no further messages will be sent");
                    stdin_open = false;
                }
            },
            () = handle.finished() => break,
            () = &mut shutdown, if !stopping => {
                info!("shutdown signal received");
                stopping = true;
                manager.stop_all().await;
            }
        }
    }

    print_backlog(&events_path, &mut printed)?;
    let meta = handle.get_metadata();
    info!(
        session_id = session_id.as_str(),
        status = %meta.status,
        turns = meta.turn_count,
        events = meta.event_count,
        "session ended"
    );
    Ok(())
}

async fn send(manager: &SessionManager, session_id: &str, text: String) {
    if let Err(err) = manager.send_message(session_id, text).await {
        warn!(%err, "message not delivered");
    }
}

async fn print_events(store: &MetadataStore, session_id: &str, from: u64, follow: bool) -> Result<()> {
    // Fails early with NotFound for unknown sessions.
    let meta = store.load(session_id)?;
    let events_path = store.events_path(session_id);

    if !follow || meta.is_ended() {
        for event in EventLog::read_from(&events_path, from)? {
            print_json(&event)?;
        }
        return Ok(());
    }

    let mut follower = EventFollower::new(&events_path)?;
    loop {
        for event in follower.read_new()?.into_iter().filter(|e| e.id >= from) {
            print_json(&event)?;
        }
        if store.load(session_id)?.is_ended() {
            // The final events precede the terminal snapshot.
            for event in follower.read_new()?.into_iter().filter(|e| e.id >= from) {
                print_json(&event)?;
            }
            return Ok(());
        }
        follower.wait(FOLLOW_FALLBACK).await;
    }
}

/// Print events from the log that have not been printed yet.
fn print_backlog(path: &Path, printed: &mut Option<u64>) -> Result<()> {
    let from = printed.map_or(0, |id| id + 1);
    for event in EventLog::read_from(path, from)? {
        print_event(&event, printed)?;
    }
    Ok(())
}

fn print_event(event: &SessionEvent, printed: &mut Option<u64>) -> Result<()> {
    if printed.is_some_and(|last| event.id <= last) {
        return Ok(());
    }
    *printed = Some(event.id);
    print_json(event)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let line = serde_json::to_string(value)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
