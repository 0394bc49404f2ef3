//! Agent process spawner.
//!
//! Spawns agent CLI processes with:
//! - `kill_on_drop(true)` so processes are cleaned up automatically.
//! - `env_clear()` + an allowlist so host secrets never leak into the child
//!   unless explicitly passed through.
//! - piped stdout (NDJSON protocol) and stderr (diagnostics only); stdin is
//!   piped only for long-lived processes.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, info_span, Instrument};

use crate::config::AgentConfig;
use crate::process::supervisor::{self, AgentProcess, ProcessInput};
use crate::{AppError, Result};

/// Environment variables inherited by every agent process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH", "HOME", "USER", "LANG", "LC_ALL", "TERM", "TMPDIR", "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE", "SystemRoot", "TEMP", "TMP", "APPDATA", "LOCALAPPDATA", "COMSPEC",
];

/// Environment variable carrying the runner's session id into the child.
pub const SESSION_ID_ENV: &str = "AGENT_SESSION_ID";

/// Parameters for one process launch.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    /// Runner session the process belongs to.
    pub session_id: &'a str,
    /// Launch counter within the session; tags every [`ProcessInput`].
    pub generation: u64,
    /// Prompt passed on the command line (per-turn processes only).
    pub prompt: Option<&'a str>,
    /// CLI session id to resume, when one has been captured.
    pub resume_id: Option<&'a str>,
    /// Keep stdin open and add the long-lived arguments.
    pub long_lived: bool,
    /// Time between terminate and force-kill.
    pub kill_grace: Duration,
}

/// Build the command line for a launch without spawning it.
#[must_use]
pub fn build_command(agent: &AgentConfig, request: &LaunchRequest<'_>) -> Command {
    let mut cmd = Command::new(&agent.program);
    cmd.args(&agent.args);

    if request.long_lived {
        cmd.args(&agent.long_lived_args);
    }

    if let (Some(flag), Some(resume_id)) = (&agent.resume_flag, request.resume_id) {
        cmd.arg(flag).arg(resume_id);
    }

    if let Some(prompt) = request.prompt {
        if let Some(flag) = &agent.prompt_flag {
            cmd.arg(flag);
        }
        cmd.arg(prompt);
    }

    // Strip inherited environment, then inject only the safe allowlist.
    cmd.env_clear();
    let passthrough = agent.env_passthrough.iter().map(String::as_str);
    for key in ALLOWED_ENV_VARS.iter().copied().chain(passthrough) {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.env(SESSION_ID_ENV, request.session_id);

    if let Some(dir) = agent.working_dir.as_deref().filter(|d| !d.as_os_str().is_empty()) {
        cmd.current_dir(dir);
    }

    let stdin = if request.long_lived {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    cmd.stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd
}

/// Spawn an agent process and start its supervisor task.
///
/// Every stdout line and the final exit are delivered through `input_tx`
/// tagged with `request.generation`.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn agent: …")`: OS spawn failure.
/// - `AppError::Spawn("failed to capture agent stdout")`: pipe setup failure.
pub fn spawn_agent(
    agent: &AgentConfig,
    request: &LaunchRequest<'_>,
    input_tx: mpsc::Sender<ProcessInput>,
) -> Result<AgentProcess> {
    let mut cmd = build_command(agent, request);
    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to spawn agent '{}': {err}",
            agent.program
        ))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
    let stderr = child.stderr.take();
    let stdin = child.stdin.take();
    let pid = child.id();

    info!(
        session_id = request.session_id,
        generation = request.generation,
        pid,
        long_lived = request.long_lived,
        "agent process spawned"
    );

    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let span = info_span!(
        "agent_process",
        session_id = request.session_id,
        generation = request.generation,
        pid
    );
    let task = tokio::spawn(
        supervisor::supervise(supervisor::Supervised {
            child,
            stdout,
            stderr,
            stdin,
            generation: request.generation,
            input_tx,
            control_rx,
            kill_grace: request.kill_grace,
        })
        .instrument(span),
    );

    Ok(AgentProcess::new(request.generation, pid, control_tx, task))
}
