//! One process per turn.
//!
//! Every turn spawns a fresh agent process with the text as its prompt
//! argument. Follow-up turns pass the captured CLI session id through the
//! configured resume flag so the agent keeps its conversation context.

use crate::driver::{Delivery, TurnContext, TurnDriver};
use crate::process::{spawn_agent, LaunchRequest};
use crate::Result;

/// Spawn-per-turn strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerTurnDriver;

impl PerTurnDriver {
    fn spawn(ctx: &TurnContext<'_>, text: &str, resume_id: Option<&str>) -> Result<Delivery> {
        let request = LaunchRequest {
            session_id: ctx.session_id,
            generation: ctx.generation,
            prompt: Some(text),
            resume_id,
            long_lived: false,
            kill_grace: ctx.kill_grace,
        };
        spawn_agent(ctx.agent, &request, ctx.input_tx.clone()).map(Delivery::Spawned)
    }
}

impl TurnDriver for PerTurnDriver {
    fn begin_turn(&self, ctx: &TurnContext<'_>, prompt: &str) -> Result<Delivery> {
        Self::spawn(ctx, prompt, None)
    }

    fn deliver_message(&self, ctx: &TurnContext<'_>, text: &str) -> Result<Delivery> {
        Self::spawn(ctx, text, ctx.cli_session_id)
    }
}
