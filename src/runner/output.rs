//! Translation of parsed agent output into session events.
//!
//! [`OutputTracker`] holds the per-turn scratch state needed to avoid
//! emitting streamed text twice and to label tool results with the tool
//! that produced them.

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::models::event::EventType;
use crate::process::parser::{AgentLine, ContentItem, ResultSummary, ToolOutput};

/// Maximum characters of a user message recorded in its event.
pub const MAX_USER_MESSAGE_CHARS: usize = 500;

/// Maximum lines of tool output recorded in a `tool_result` event.
pub const MAX_TOOL_OUTPUT_LINES: usize = 200;

/// Tool name used when a result arrives before any `tool_use`.
const UNKNOWN_TOOL: &str = "unknown";

/// What one agent line means for the session.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LineOutcome {
    /// Events to emit, in order.
    pub events: Vec<(EventType, Value)>,
    /// CLI session id announced by the line.
    pub cli_session_id: Option<String>,
    /// Present when the line was a `result` summary.
    pub result: Option<ResultSummary>,
}

/// Figures reported by the agent for the turn, if any.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TurnStats {
    /// Duration from the `result` line.
    pub duration_ms: Option<u64>,
    /// Cost from the `result` line.
    pub cost_usd: Option<f64>,
}

/// Tool output after line truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncatedOutput {
    /// Retained text, with a marker line appended when truncated.
    pub text: String,
    /// Whether lines were dropped.
    pub truncated: bool,
    /// Line count of the original output.
    pub total_lines: usize,
}

/// Per-turn output bookkeeping.
#[derive(Debug, Default)]
pub struct OutputTracker {
    streamed: HashSet<u64>,
    active_block: Option<u64>,
    last_tool: Option<String>,
    stats: TurnStats,
}

impl OutputTracker {
    /// Fresh tracker with no scratch state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the most recent `tool_use` in this turn.
    #[must_use]
    pub fn last_tool(&self) -> Option<&str> {
        self.last_tool.as_deref()
    }

    /// Content index of the text block currently streaming.
    #[must_use]
    pub fn active_block(&self) -> Option<u64> {
        self.active_block
    }

    /// Interpret one line of agent output.
    pub fn observe(&mut self, line: AgentLine) -> LineOutcome {
        let mut outcome = LineOutcome::default();
        match line {
            AgentLine::System { session_id } => outcome.cli_session_id = session_id,
            AgentLine::BlockStart { index, is_text } => {
                if is_text {
                    self.streamed.insert(index);
                    self.active_block = Some(index);
                }
            }
            AgentLine::BlockDelta { index, text } => {
                self.streamed.insert(index);
                if !text.is_empty() {
                    outcome.events.push((
                        EventType::AssistantText,
                        json!({ "text": text, "delta": true, "index": index }),
                    ));
                }
            }
            AgentLine::BlockStop { .. } => self.active_block = None,
            AgentLine::Assistant { content } => self.observe_message(content, &mut outcome),
            AgentLine::ToolResults(outputs) => {
                for output in outputs {
                    outcome
                        .events
                        .push((EventType::ToolResult, self.tool_result_data(output)));
                }
            }
            AgentLine::Result(summary) => {
                outcome.cli_session_id.clone_from(&summary.session_id);
                if summary.duration_ms.is_some() {
                    self.stats.duration_ms = summary.duration_ms;
                }
                if summary.cost_usd.is_some() {
                    self.stats.cost_usd = summary.cost_usd;
                }
                outcome.result = Some(summary);
            }
        }
        outcome
    }

    /// Take the turn's stats and reset all per-turn scratch state.
    pub fn finish_turn(&mut self) -> TurnStats {
        self.streamed.clear();
        self.active_block = None;
        self.last_tool = None;
        std::mem::take(&mut self.stats)
    }

    fn observe_message(&mut self, content: Vec<ContentItem>, outcome: &mut LineOutcome) {
        for (index, item) in (0_u64..).zip(content) {
            match item {
                ContentItem::Text(text) => {
                    if !text.is_empty() && !self.streamed.contains(&index) {
                        outcome
                            .events
                            .push((EventType::AssistantText, json!({ "text": text, "delta": false })));
                    }
                }
                ContentItem::ToolUse { name, input } => {
                    outcome
                        .events
                        .push((EventType::ToolUse, json!({ "tool": name, "input": input })));
                    self.last_tool = Some(name);
                }
                ContentItem::Other => {}
            }
        }
        // Streamed indices belong to the message that just completed.
        self.streamed.clear();
        self.active_block = None;
    }

    fn tool_result_data(&self, output: ToolOutput) -> Value {
        let truncated = truncate_lines(&output.output, MAX_TOOL_OUTPUT_LINES);
        json!({
            "tool": self.last_tool.as_deref().unwrap_or(UNKNOWN_TOOL),
            "output": truncated.text,
            "truncated": truncated.truncated,
            "totalLines": truncated.total_lines,
            "isError": output.is_error,
        })
    }
}

/// Keep at most `max_chars` characters of `text`.
///
/// Returns the retained text and whether anything was cut.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => (text[..cut].to_owned(), true),
        None => (text.to_owned(), false),
    }
}

/// Keep at most `max_lines` lines of `text`, appending a
/// `[... truncated, N total lines]` marker when lines were dropped.
#[must_use]
pub fn truncate_lines(text: &str, max_lines: usize) -> TruncatedOutput {
    let total_lines = text.lines().count();
    if total_lines <= max_lines {
        return TruncatedOutput {
            text: text.to_owned(),
            truncated: false,
            total_lines,
        };
    }

    let kept = text.lines().take(max_lines).collect::<Vec<_>>().join("\n");
    TruncatedOutput {
        text: format!("{kept}\n[... truncated, {total_lines} total lines]"),
        truncated: true,
        total_lines,
    }
}
