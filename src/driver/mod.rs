//! Turn strategies.
//!
//! The [`TurnDriver`] trait is the only place where the two ways of running
//! an agent differ. Everything else (output parsing, events, timers,
//! persistence) is shared by the runner.
//!
//! | strategy                        | turn starts by                  | turn ends on        |
//! |---------------------------------|---------------------------------|---------------------|
//! | [`per_turn::PerTurnDriver`]     | spawning a process with the prompt | process exit     |
//! | [`long_lived::LongLivedDriver`] | writing the prompt to stdin     | the `result` line   |

pub mod long_lived;
pub mod per_turn;

use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::AgentConfig;
use crate::models::session::RunnerMode;
use crate::process::{AgentProcess, ProcessInput};
use crate::Result;

/// Everything a strategy needs to reach the agent for one turn.
pub struct TurnContext<'a> {
    /// Launch settings.
    pub agent: &'a AgentConfig,
    /// Runner session id.
    pub session_id: &'a str,
    /// CLI session id captured from earlier output.
    pub cli_session_id: Option<&'a str>,
    /// Generation to tag a newly spawned process with.
    pub generation: u64,
    /// Grace period for a newly spawned process.
    pub kill_grace: Duration,
    /// Process that is still alive from an earlier turn, if any.
    pub current: Option<&'a AgentProcess>,
    /// Channel the supervisor reports into.
    pub input_tx: &'a mpsc::Sender<ProcessInput>,
}

/// Outcome of handing text to the agent.
#[derive(Debug)]
pub enum Delivery {
    /// A new process was started; the runner now owns it.
    Spawned(AgentProcess),
    /// The text was written to the already-running process.
    Written,
}

/// Protocol-agnostic interface between the runner and the agent process.
pub trait TurnDriver: Send + Sync {
    /// Begin the first turn of a session with `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`](crate::AppError::Spawn) if the agent cannot
    /// be started or the prompt cannot be delivered.
    fn begin_turn(&self, ctx: &TurnContext<'_>, prompt: &str) -> Result<Delivery>;

    /// Deliver a follow-up message for a new turn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`](crate::AppError::Spawn) if the agent cannot
    /// be reached.
    fn deliver_message(&self, ctx: &TurnContext<'_>, text: &str) -> Result<Delivery>;

    /// Whether a `result` line marks the end of the turn.
    ///
    /// When `false` the runner waits for the process to exit instead.
    fn result_ends_turn(&self) -> bool {
        false
    }
}

/// Strategy implementation for a mode.
#[must_use]
pub fn driver_for(mode: RunnerMode) -> Box<dyn TurnDriver> {
    match mode {
        RunnerMode::PerTurn => Box::new(per_turn::PerTurnDriver),
        RunnerMode::LongLived => Box::new(long_lived::LongLivedDriver),
    }
}
