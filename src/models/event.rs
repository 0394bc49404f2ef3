//! Session event model: one immutable fact in a session timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a [`SessionEvent`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Lifecycle or informational message from the runner.
    System,
    /// A turn began.
    TurnStart,
    /// A turn finished.
    TurnEnd,
    /// Message sent by the caller for a follow-up turn.
    UserMessage,
    /// Assistant text, either a streamed delta or a whole block.
    AssistantText,
    /// The agent invoked a tool.
    ToolUse,
    /// Output of a tool invocation.
    ToolResult,
    /// The session is idle and accepts a new message.
    WaitingForInput,
    /// Something went wrong.
    Error,
}

/// One entry of a session's append-only event log.
///
/// `id` is scoped to the session, starts at 0 and is gapless.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEvent {
    /// Monotonic, gapless identifier within the session.
    pub id: u64,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Kind-specific payload.
    pub data: Value,
}

impl SessionEvent {
    /// Construct an event stamped with the current time.
    #[must_use]
    pub fn new(id: u64, kind: EventType, data: Value) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            kind,
            data,
        }
    }

    /// The `message` field of the payload, when present.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.data.get("message").and_then(Value::as_str)
    }
}
