//! Global configuration parsing, validation, and runtime settings.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::models::session::RunnerMode;
use crate::{AppError, Result};

/// How the agent CLI is launched for each session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent CLI binary (e.g., `claude`).
    pub program: String,
    /// Arguments always passed before anything else.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra arguments used only when the process stays alive across turns.
    #[serde(default)]
    pub long_lived_args: Vec<String>,
    /// Flag preceding the prompt; when absent the prompt is positional.
    #[serde(default)]
    pub prompt_flag: Option<String>,
    /// Flag preceding the captured CLI session id on follow-up turns.
    #[serde(default)]
    pub resume_flag: Option<String>,
    /// Directory the child process starts in.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Additional environment variables copied into the child.
    #[serde(default)]
    pub env_passthrough: Vec<String>,
}

impl AgentConfig {
    /// Build a launch configuration for `program` with no extra arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            long_lived_args: Vec::new(),
            prompt_flag: None,
            resume_flag: None,
            working_dir: None,
            env_passthrough: Vec::new(),
        }
    }
}

/// Timeout values (seconds) for the session clocks.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Per-turn timeout.
    #[serde(default = "default_turn_seconds")]
    pub turn_seconds: u64,
    /// Idle timeout between turns.
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: u64,
    /// Maximum lifetime of a whole session.
    #[serde(default = "default_max_lifetime_seconds")]
    pub max_lifetime_seconds: u64,
    /// Grace period between terminate and force-kill.
    #[serde(default = "default_kill_grace_seconds")]
    pub kill_grace_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            turn_seconds: default_turn_seconds(),
            idle_seconds: default_idle_seconds(),
            max_lifetime_seconds: default_max_lifetime_seconds(),
            kill_grace_seconds: default_kill_grace_seconds(),
        }
    }
}

fn default_turn_seconds() -> u64 {
    30 * 60
}

fn default_idle_seconds() -> u64 {
    30 * 60
}

fn default_max_lifetime_seconds() -> u64 {
    4 * 60 * 60
}

fn default_kill_grace_seconds() -> u64 {
    10
}

fn default_max_concurrent_sessions() -> u32 {
    3
}

fn default_max_events() -> u64 {
    5000
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root directory for session metadata and event logs.
    pub data_dir: PathBuf,
    /// Maximum live sessions across all projects.
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: u32,
    /// Hard cap on events recorded for a single session.
    #[serde(default = "default_max_events")]
    pub max_events_per_session: u64,
    /// Strategy used when a session request does not choose one.
    #[serde(default)]
    pub default_mode: RunnerMode,
    /// Agent CLI launch settings.
    pub agent: AgentConfig,
    /// Session clocks.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Directory holding one sub-directory per session.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Convert the file-level configuration into runner settings.
    #[must_use]
    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            agent: self.agent.clone(),
            default_mode: self.default_mode,
            turn_timeout: Duration::from_secs(self.timeouts.turn_seconds),
            idle_timeout: Duration::from_secs(self.timeouts.idle_seconds),
            max_lifetime: Duration::from_secs(self.timeouts.max_lifetime_seconds),
            kill_grace: Duration::from_secs(self.timeouts.kill_grace_seconds),
            max_events: self.max_events_per_session,
            max_concurrent_sessions: self.max_concurrent_sessions as usize,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(AppError::Config("data_dir must not be empty".into()));
        }

        if self.max_concurrent_sessions == 0 {
            return Err(AppError::Config(
                "max_concurrent_sessions must be greater than zero".into(),
            ));
        }

        if self.max_events_per_session == 0 {
            return Err(AppError::Config(
                "max_events_per_session must be greater than zero".into(),
            ));
        }

        if self.agent.program.trim().is_empty() {
            return Err(AppError::Config("agent.program must not be empty".into()));
        }

        let timeouts = [
            ("turn_seconds", self.timeouts.turn_seconds),
            ("idle_seconds", self.timeouts.idle_seconds),
            ("max_lifetime_seconds", self.timeouts.max_lifetime_seconds),
            ("kill_grace_seconds", self.timeouts.kill_grace_seconds),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(AppError::Config(format!(
                "timeouts.{name} must be greater than zero"
            )));
        }

        Ok(())
    }
}

/// Runtime settings consumed by runners and the session manager.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Agent CLI launch settings.
    pub agent: AgentConfig,
    /// Strategy used when a request does not choose one.
    pub default_mode: RunnerMode,
    /// Default per-turn timeout (a session may override it).
    pub turn_timeout: Duration,
    /// Idle timeout between turns.
    pub idle_timeout: Duration,
    /// Maximum lifetime of a session.
    pub max_lifetime: Duration,
    /// Grace period between terminate and force-kill.
    pub kill_grace: Duration,
    /// Hard cap on events per session.
    pub max_events: u64,
    /// Global live-session ceiling.
    pub max_concurrent_sessions: usize,
}

impl RunnerSettings {
    /// Settings with production defaults for the given agent command.
    #[must_use]
    pub fn new(agent: AgentConfig) -> Self {
        Self {
            agent,
            default_mode: RunnerMode::default(),
            turn_timeout: Duration::from_secs(default_turn_seconds()),
            idle_timeout: Duration::from_secs(default_idle_seconds()),
            max_lifetime: Duration::from_secs(default_max_lifetime_seconds()),
            kill_grace: Duration::from_secs(default_kill_grace_seconds()),
            max_events: default_max_events(),
            max_concurrent_sessions: default_max_concurrent_sessions() as usize,
        }
    }
}
