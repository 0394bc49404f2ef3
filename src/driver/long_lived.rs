//! One process for the whole session.
//!
//! The agent is spawned once with the long-lived arguments and receives
//! every prompt as an NDJSON user message on stdin. The process stays alive
//! between turns, so the `result` line is the turn boundary.

use serde_json::json;

use crate::driver::{Delivery, TurnContext, TurnDriver};
use crate::process::{spawn_agent, AgentProcess, LaunchRequest};
use crate::Result;

/// Long-lived-process strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongLivedDriver;

/// Encode `text` as the NDJSON user message the agent reads on stdin.
#[must_use]
pub fn user_message_line(text: &str) -> String {
    json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": [{ "type": "text", "text": text }],
        }
    })
    .to_string()
}

fn write(process: &AgentProcess, text: &str) -> Result<()> {
    process.write_line(user_message_line(text))
}

impl LongLivedDriver {
    fn spawn_and_write(ctx: &TurnContext<'_>, text: &str) -> Result<Delivery> {
        let request = LaunchRequest {
            session_id: ctx.session_id,
            generation: ctx.generation,
            prompt: None,
            resume_id: ctx.cli_session_id,
            long_lived: true,
            kill_grace: ctx.kill_grace,
        };
        let process = spawn_agent(ctx.agent, &request, ctx.input_tx.clone())?;
        if let Err(err) = write(&process, text) {
            process.kill();
            return Err(err);
        }
        Ok(Delivery::Spawned(process))
    }
}

impl TurnDriver for LongLivedDriver {
    fn begin_turn(&self, ctx: &TurnContext<'_>, prompt: &str) -> Result<Delivery> {
        Self::spawn_and_write(ctx, prompt)
    }

    /// Writes to the running process, or respawns it (resuming the CLI
    /// session) when an earlier turn ended with the process exiting.
    fn deliver_message(&self, ctx: &TurnContext<'_>, text: &str) -> Result<Delivery> {
        match ctx.current.filter(|process| process.is_running()) {
            Some(process) => write(process, text).map(|()| Delivery::Written),
            None => Self::spawn_and_write(ctx, text),
        }
    }

    fn result_ends_turn(&self) -> bool {
        true
    }
}
