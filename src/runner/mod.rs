//! The session runner.
//!
//! Each session is driven by one tokio task (the actor) that exclusively
//! owns the session's metadata, event emitter, timers and agent process.
//! Callers talk to it through a cloneable [`RunnerHandle`]:
//!
//! - commands (`start`, `send_message`, `stop`) travel over an mpsc channel
//!   and are answered through a oneshot;
//! - the latest [`SessionMetadata`] snapshot is published on a `watch`
//!   channel, so [`RunnerHandle::get_metadata`] never waits on the actor;
//! - events are fanned out on a `broadcast` channel; lagging subscribers
//!   lose events rather than slowing the session down.
//!
//! The actor reacts to four sources: caller commands, agent output and exit
//! (from the process supervisor), and the earliest armed session clock.

pub mod emitter;
pub mod output;
pub mod timers;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RunnerSettings;
use crate::driver::{driver_for, Delivery, TurnContext, TurnDriver};
use crate::models::event::{EventType, SessionEvent};
use crate::models::session::{RunnerMode, RunnerState, SessionMetadata, SessionStatus};
use crate::persistence::{EventLog, MetadataStore};
use crate::process::parser::AgentLine;
use crate::process::{AgentProcess, ProcessInput};
use crate::{AppError, Result};

use self::emitter::{Emission, EventEmitter, EVENT_LIMIT_MESSAGE};
use self::output::{truncate_chars, OutputTracker, TurnStats, MAX_USER_MESSAGE_CHARS};
use self::timers::{SessionClock, SessionTimers};

const COMMAND_CAPACITY: usize = 32;
const PROCESS_INPUT_CAPACITY: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Per-session choices made by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Owning project.
    pub project_id: String,
    /// Turn strategy; the configured default when `None`.
    pub mode: Option<RunnerMode>,
    /// Per-turn timeout override.
    pub turn_timeout: Option<Duration>,
}

impl SessionOptions {
    /// Options for `project_id` using configured defaults.
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            mode: None,
            turn_timeout: None,
        }
    }

    /// Choose the turn strategy.
    #[must_use]
    pub fn with_mode(mut self, mode: RunnerMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Override the per-turn timeout.
    #[must_use]
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = Some(timeout);
        self
    }
}

enum Command {
    Start {
        prompt: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SendMessage {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start { .. } => f.write_str("Start"),
            Self::SendMessage { .. } => f.write_str("SendMessage"),
            Self::Stop => f.write_str("Stop"),
        }
    }
}

/// Cloneable control surface of one session.
///
/// When every handle has been dropped the session stops itself.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    session_id: Arc<str>,
    commands: mpsc::Sender<Command>,
    metadata: watch::Receiver<SessionMetadata>,
    events: broadcast::Sender<SessionEvent>,
    finished: watch::Receiver<bool>,
}

impl RunnerHandle {
    /// Create a session and spawn its actor. The session does nothing until
    /// [`start`](Self::start) is called.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn spawn(settings: Arc<RunnerSettings>, store: MetadataStore, options: SessionOptions) -> Self {
        let mode = options.mode.unwrap_or(settings.default_mode);
        let turn_timeout = options.turn_timeout.unwrap_or(settings.turn_timeout);
        let meta = SessionMetadata::new(options.project_id, mode);
        let session_id: Arc<str> = Arc::from(meta.session_id.as_str());

        let log = match EventLog::open(store.events_path(&meta.session_id)) {
            Ok(log) => Some(log),
            Err(err) => {
                warn!(session_id = %session_id, %err, "event log unavailable, events will not be persisted");
                None
            }
        };

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (input_tx, input_rx) = mpsc::channel(PROCESS_INPUT_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (meta_tx, meta_rx) = watch::channel(meta.clone());
        let (finished_tx, finished_rx) = watch::channel(false);

        let span = info_span!(
            "session_runner",
            session_id = %session_id,
            project_id = meta.project_id.as_str(),
            mode = ?mode,
        );

        let actor = SessionActor {
            emitter: EventEmitter::new(settings.max_events, log, events_tx.clone()),
            driver: driver_for(mode),
            tracker: OutputTracker::new(),
            timers: SessionTimers::new(),
            process: None,
            generation: 0,
            started: false,
            turn_timeout,
            meta,
            settings,
            store,
            meta_tx,
            input_tx,
        };
        tokio::spawn(actor.run(commands_rx, input_rx, finished_tx).instrument(span));

        Self {
            session_id,
            commands: commands_tx,
            metadata: meta_rx,
            events: events_tx,
            finished: finished_rx,
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Begin the first turn with `prompt`.
    ///
    /// Spawn failures do not surface here: they are recorded as an `error`
    /// event and the session ends as `failed`.
    ///
    /// # Errors
    ///
    /// - `AppError::AlreadyStarted` if the session was started before.
    /// - `AppError::SessionEnded` if the session has ended.
    pub async fn start(&self, prompt: impl Into<String>) -> Result<()> {
        let prompt = prompt.into();
        self.request(|reply| Command::Start { prompt, reply }).await
    }

    /// Begin a follow-up turn with `text`.
    ///
    /// # Errors
    ///
    /// - `AppError::NotIdle` if a turn is in flight or the session has not
    ///   started.
    /// - `AppError::SessionEnded` if the session has ended.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.request(|reply| Command::SendMessage { text, reply })
            .await
    }

    /// Stop the session and wait until it has ended and its agent process
    /// has been reaped. Calling it again is a no-op.
    pub async fn stop(&self) {
        // A closed channel means the actor is already shutting down.
        let _ = self.commands.send(Command::Stop).await;
        self.finished().await;
    }

    /// Latest metadata snapshot.
    #[must_use]
    pub fn get_metadata(&self) -> SessionMetadata {
        self.metadata.borrow().clone()
    }

    /// Receive every event emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Wait until the actor has exited and its agent process is reaped.
    pub async fn finished(&self) {
        let mut finished = self.finished.clone();
        // An error means the actor is gone, which is finished too.
        let _ = finished.wait_for(|done| *done).await;
    }

    /// Whether [`finished`](Self::finished) would return immediately.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| self.ended_error())?;
        reply_rx.await.map_err(|_| self.ended_error())?
    }

    fn ended_error(&self) -> AppError {
        AppError::SessionEnded(format!("session {} has ended", self.session_id))
    }
}

struct SessionActor {
    meta: SessionMetadata,
    settings: Arc<RunnerSettings>,
    store: MetadataStore,
    driver: Box<dyn TurnDriver>,
    emitter: EventEmitter,
    tracker: OutputTracker,
    timers: SessionTimers,
    process: Option<AgentProcess>,
    /// Generation of the newest spawned process.
    generation: u64,
    started: bool,
    turn_timeout: Duration,
    meta_tx: watch::Sender<SessionMetadata>,
    input_tx: mpsc::Sender<ProcessInput>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inputs: mpsc::Receiver<ProcessInput>,
        finished_tx: watch::Sender<bool>,
    ) {
        while !self.meta.is_ended() {
            let deadline = self.timers.next_deadline();
            let clock = async move {
                match deadline {
                    Some((clock, at)) => {
                        tokio::time::sleep_until(at).await;
                        clock
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("all handles dropped, stopping session");
                        self.finalize(SessionStatus::Stopped, None);
                    }
                },
                Some(input) = inputs.recv() => self.handle_input(input),
                clock = clock => self.handle_timeout(clock),
            }

            self.enforce_event_limit();
        }

        // Pending and future requests observe the ended session.
        drop(commands);
        // Closing the input channel keeps a supervisor from blocking on a full
        // queue while it is being reaped.
        drop(inputs);
        if let Some(process) = self.process.take() {
            process.wait().await;
        }

        info!(status = %self.meta.status, events = self.meta.event_count, "session runner finished");
        finished_tx.send_replace(true);
    }

    // ── Commands ────────────────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { prompt, reply } => {
                let _ = reply.send(self.start(&prompt));
            }
            Command::SendMessage { text, reply } => {
                let _ = reply.send(self.send_message(&text));
            }
            Command::Stop => {
                if !self.meta.is_ended() {
                    info!("stop requested");
                    self.finalize(SessionStatus::Stopped, None);
                }
            }
        }
    }

    fn start(&mut self, prompt: &str) -> Result<()> {
        if self.meta.is_ended() {
            return Err(self.ended_error());
        }
        if self.started {
            return Err(AppError::AlreadyStarted(format!(
                "session {} has already started",
                self.meta.session_id
            )));
        }

        self.started = true;
        self.meta.turn_count = 1;
        self.meta.state = RunnerState::Processing;
        info!(turn = 1, "session started");

        self.emit(
            EventType::System,
            json!({
                "message": "Session started",
                "projectId": self.meta.project_id,
                "mode": self.meta.mode,
            }),
        );
        self.emit(EventType::TurnStart, json!({ "turn": 1 }));
        self.timers.arm(SessionClock::Lifetime, self.settings.max_lifetime);
        self.timers.arm(SessionClock::Turn, self.turn_timeout);
        self.persist();

        if !self.enforce_event_limit() {
            self.deliver(prompt, true);
        }
        Ok(())
    }

    fn send_message(&mut self, text: &str) -> Result<()> {
        if self.meta.is_ended() {
            return Err(self.ended_error());
        }
        if !self.started || self.meta.state != RunnerState::Idle {
            return Err(AppError::NotIdle(format!(
                "session {} is not waiting for input",
                self.meta.session_id
            )));
        }

        self.timers.cancel(SessionClock::Idle);
        self.meta.turn_count += 1;
        self.meta.state = RunnerState::Processing;
        let turn = self.meta.turn_count;
        info!(turn, "turn started");

        let (recorded, truncated) = truncate_chars(text, MAX_USER_MESSAGE_CHARS);
        self.emit(
            EventType::UserMessage,
            json!({ "text": recorded, "truncated": truncated, "turn": turn }),
        );
        self.emit(EventType::TurnStart, json!({ "turn": turn }));
        self.timers.arm(SessionClock::Turn, self.turn_timeout);
        self.persist();

        if !self.enforce_event_limit() {
            self.deliver(text, false);
        }
        Ok(())
    }

    /// Hand `text` to the strategy and take ownership of any new process.
    fn deliver(&mut self, text: &str, first_turn: bool) {
        let outcome = {
            let ctx = TurnContext {
                agent: &self.settings.agent,
                session_id: &self.meta.session_id,
                cli_session_id: self.meta.cli_session_id.as_deref(),
                generation: self.generation + 1,
                kill_grace: self.settings.kill_grace,
                current: self.process.as_ref(),
                input_tx: &self.input_tx,
            };
            if first_turn {
                self.driver.begin_turn(&ctx, text)
            } else {
                self.driver.deliver_message(&ctx, text)
            }
        };

        match outcome {
            Ok(Delivery::Spawned(process)) => {
                self.generation = process.generation();
                if let Some(previous) = self.process.replace(process) {
                    previous.terminate();
                }
            }
            Ok(Delivery::Written) => {}
            Err(err) => {
                let message = err.to_string();
                warn!(turn = self.meta.turn_count, error = message.as_str(), "failed to deliver turn to agent");
                self.emit(
                    EventType::Error,
                    json!({ "message": message, "turn": self.meta.turn_count }),
                );
                self.finalize(SessionStatus::Failed, Some(message));
                return;
            }
        }

        self.meta.pid = self.process.as_ref().and_then(AgentProcess::pid);
        self.persist();
    }

    // ── Agent output ────────────────────────────────────────────────────────

    fn handle_input(&mut self, input: ProcessInput) {
        match input {
            ProcessInput::Line { generation, line } => {
                if generation == self.generation {
                    self.handle_line(line);
                } else {
                    debug!(generation, current = self.generation, "dropping output from stale process");
                }
            }
            ProcessInput::Exited {
                generation,
                exit_code,
            } => {
                if generation == self.generation {
                    self.handle_exit(exit_code);
                } else {
                    debug!(generation, current = self.generation, "ignoring exit of stale process");
                }
            }
        }
    }

    fn handle_line(&mut self, line: AgentLine) {
        let outcome = self.tracker.observe(line);

        let mut changed = false;
        if let Some(cli_session_id) = outcome.cli_session_id {
            if self.meta.cli_session_id.as_deref() != Some(cli_session_id.as_str()) {
                debug!(cli_session_id = cli_session_id.as_str(), "captured cli session id");
                self.meta.cli_session_id = Some(cli_session_id);
                changed = true;
            }
        }

        for (kind, data) in outcome.events {
            self.emit(kind, data);
        }

        let turn_result = outcome.result.filter(|_| {
            self.driver.result_ends_turn() && self.meta.state == RunnerState::Processing
        });
        if let Some(summary) = turn_result {
            self.complete_turn(Some(i32::from(summary.is_error)));
        } else if changed {
            self.persist();
        }
    }

    fn handle_exit(&mut self, exit_code: Option<i32>) {
        self.process = None;
        match self.meta.state {
            RunnerState::Processing => self.complete_turn(exit_code),
            RunnerState::Idle => {
                info!(exit_code, "agent process exited while idle");
                self.meta.exit_code = exit_code;
                if exit_code == Some(0) {
                    self.finalize(SessionStatus::Completed, None);
                } else {
                    let message = match exit_code {
                        Some(code) => format!("Agent process exited with code {code}"),
                        None => "Agent process was terminated by a signal".to_owned(),
                    };
                    self.finalize(SessionStatus::Failed, Some(message));
                }
            }
            RunnerState::Ended => {}
        }
    }

    fn complete_turn(&mut self, exit_code: Option<i32>) {
        self.timers.cancel(SessionClock::Turn);
        let turn = self.meta.turn_count;
        let stats = self.tracker.finish_turn();
        info!(turn, exit_code, "turn finished");

        self.meta.exit_code = exit_code;
        self.meta.pid = None;

        self.emit(
            EventType::TurnEnd,
            with_stats(json!({ "turn": turn, "exitCode": exit_code }), &stats),
        );
        self.emit(
            EventType::System,
            with_stats(
                json!({ "message": turn_summary(turn, exit_code, &stats), "turn": turn }),
                &stats,
            ),
        );
        if let Some(code) = exit_code.filter(|code| *code != 0) {
            self.emit(
                EventType::Error,
                json!({
                    "message": format!("Turn {turn} failed with exit code {code}"),
                    "turn": turn,
                    "exitCode": code,
                }),
            );
        }

        self.meta.state = RunnerState::Idle;
        self.emit(EventType::WaitingForInput, json!({ "turn": turn }));
        self.timers.arm(SessionClock::Idle, self.settings.idle_timeout);
        self.persist();
    }

    // ── Clocks ──────────────────────────────────────────────────────────────

    fn handle_timeout(&mut self, clock: SessionClock) {
        self.timers.cancel(clock);
        match clock {
            SessionClock::Turn => {
                let turn = self.meta.turn_count;
                let message = format!("Turn {turn} timed out after {:?}", self.turn_timeout);
                warn!(turn, "turn timeout");
                self.emit(EventType::Error, json!({ "message": message, "turn": turn }));
                self.finalize(SessionStatus::TimedOut, Some(message));
            }
            SessionClock::Lifetime => {
                let message = format!(
                    "Session exceeded maximum lifetime of {:?}",
                    self.settings.max_lifetime
                );
                warn!("max lifetime reached");
                self.emit(EventType::Error, json!({ "message": message }));
                self.finalize(SessionStatus::TimedOut, Some(message));
            }
            SessionClock::Idle => {
                let message = format!(
                    "Session idle for {:?}, stopping",
                    self.settings.idle_timeout
                );
                info!("idle timeout");
                self.emit(EventType::System, json!({ "message": message }));
                self.finalize(SessionStatus::TimedOut, None);
            }
        }
    }

    // ── Emission and persistence ────────────────────────────────────────────

    fn emit(&mut self, kind: EventType, data: Value) {
        if let Emission::Recorded(_) | Emission::LimitReached = self.emitter.emit(kind, data) {
            self.meta.event_count = self.emitter.count();
        }
    }

    /// Stop the session once the event cap has been hit. Returns whether the
    /// session has ended.
    fn enforce_event_limit(&mut self) -> bool {
        if self.emitter.limit_reached() && !self.meta.is_ended() {
            self.finalize(SessionStatus::Stopped, Some(EVENT_LIMIT_MESSAGE.to_owned()));
        }
        self.meta.is_ended()
    }

    /// The single exit point of the state machine.
    fn finalize(&mut self, status: SessionStatus, error: Option<String>) {
        if self.meta.is_ended() {
            return;
        }

        self.timers.clear_all();
        if let Some(process) = self.process.as_ref() {
            process.terminate();
        }
        if error.is_some() {
            self.meta.error = error;
        }

        self.emit(
            EventType::System,
            json!({ "message": format!("Session {status}"), "status": status }),
        );
        self.meta.mark_ended(status, Utc::now());
        info!(%status, "session finalized");
        self.persist();
    }

    fn persist(&mut self) {
        self.meta.event_count = self.emitter.count();
        if let Err(err) = self.store.save(&self.meta) {
            warn!(%err, "failed to persist session metadata");
        }
        self.meta_tx.send_replace(self.meta.clone());
    }

    fn ended_error(&self) -> AppError {
        AppError::SessionEnded(format!("session {} has ended", self.meta.session_id))
    }
}

/// Attach the agent-reported duration and cost, when present.
fn with_stats(mut data: Value, stats: &TurnStats) -> Value {
    if let Some(ms) = stats.duration_ms {
        data["durationMs"] = Value::from(ms);
    }
    if let Some(cost) = stats.cost_usd {
        data["costUsd"] = Value::from(cost);
    }
    data
}

fn turn_summary(turn: u32, exit_code: Option<i32>, stats: &TurnStats) -> String {
    let mut message = match exit_code {
        Some(code) => format!("Turn {turn} finished with exit code {code}"),
        None => format!("Turn {turn} finished without an exit code"),
    };
    if let Some(ms) = stats.duration_ms {
        message = format!("{message} in {ms}ms");
    }
    if let Some(cost) = stats.cost_usd {
        message = format!("{message}, cost ${cost:.4}");
    }
    message
}
