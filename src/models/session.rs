//! Session metadata model and lifecycle helpers.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse lifecycle status; everything except `Running` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionStatus {
    /// Session is live.
    #[serde(rename = "running")]
    Running,
    /// The agent ended the conversation on its own.
    #[serde(rename = "completed")]
    Completed,
    /// Spawn failure, delivery failure, or interrupted by a host restart.
    #[serde(rename = "failed")]
    Failed,
    /// Stopped explicitly or by the event cap.
    #[serde(rename = "stopped")]
    Stopped,
    /// One of the session clocks fired.
    #[serde(rename = "timed-out")]
    TimedOut,
}

impl SessionStatus {
    /// Whether this status can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Wire representation (matches the serialized form).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::TimedOut => "timed-out",
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained runtime indicator maintained by the runner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    /// A turn is executing.
    Processing,
    /// Between turns, accepting a new message.
    Idle,
    /// Terminal.
    Ended,
}

/// How the agent process relates to turns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunnerMode {
    /// A fresh process per turn; process exit ends the turn.
    #[default]
    PerTurn,
    /// One process for the whole session; the `result` line ends the turn.
    LongLived,
}

/// Persisted snapshot of a session, overwritten on every transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Generated session identifier.
    pub session_id: String,
    /// Owning project.
    pub project_id: String,
    /// Turn strategy.
    pub mode: RunnerMode,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Runtime state.
    pub state: RunnerState,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
    /// When the session reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
    /// Wall-clock duration, computed at finalization.
    pub duration_ms: Option<u64>,
    /// Events emitted so far.
    pub event_count: u64,
    /// Exit code of the last turn's process.
    pub exit_code: Option<i32>,
    /// Failure description.
    pub error: Option<String>,
    /// PID of the process running the current turn.
    pub pid: Option<u32>,
    /// Identifier assigned by the agent CLI itself.
    pub cli_session_id: Option<String>,
    /// Turns started so far (1-based once started).
    pub turn_count: u32,
    /// PID of the host process whose runner owns the session.
    #[serde(default)]
    pub host_pid: Option<u32>,
}

impl SessionMetadata {
    /// Construct metadata for a new session with a generated identifier.
    #[must_use]
    pub fn new(project_id: String, mode: RunnerMode) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            project_id,
            mode,
            status: SessionStatus::Running,
            state: RunnerState::Processing,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            event_count: 0,
            exit_code: None,
            error: None,
            pid: None,
            cli_session_id: None,
            turn_count: 0,
            host_pid: Some(std::process::id()),
        }
    }

    /// Whether the session has reached its terminal state.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state == RunnerState::Ended
    }

    /// Move to a terminal status, stamping `ended_at` and `duration_ms`.
    pub fn mark_ended(&mut self, status: SessionStatus, ended_at: DateTime<Utc>) {
        let elapsed = ended_at.signed_duration_since(self.started_at);
        self.status = status;
        self.state = RunnerState::Ended;
        self.ended_at = Some(ended_at);
        self.duration_ms = Some(u64::try_from(elapsed.num_milliseconds()).unwrap_or(0));
        self.pid = None;
    }
}
