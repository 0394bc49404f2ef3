//! Typed parsing of agent stdout lines.
//!
//! # Recognised line types
//!
//! | `type`                | Maps to                                   |
//! |-----------------------|-------------------------------------------|
//! | `system`              | [`AgentLine::System`]                     |
//! | `content_block_start` | [`AgentLine::BlockStart`]                 |
//! | `content_block_delta` | [`AgentLine::BlockDelta`] (text deltas)   |
//! | `content_block_stop`  | [`AgentLine::BlockStop`]                  |
//! | `stream_event`        | the wrapped `content_block_*` line        |
//! | `assistant`           | [`AgentLine::Assistant`]                  |
//! | `tool_result`         | [`AgentLine::ToolResults`]                |
//! | `user`                | [`AgentLine::ToolResults`] when it carries tool results |
//! | `result`              | [`AgentLine::Result`]                     |
//! | *(any other)*         | Skipped                                   |

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{AppError, Result};

/// One recognised line of agent output.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentLine {
    /// Initialisation or status line, possibly carrying the CLI session id.
    System {
        /// Identifier the CLI assigned to its own session.
        session_id: Option<String>,
    },
    /// A content block opened.
    BlockStart {
        /// Position of the block in the message content array.
        index: u64,
        /// Whether the block holds text.
        is_text: bool,
    },
    /// Incremental text for an open block.
    BlockDelta {
        /// Position of the block in the message content array.
        index: u64,
        /// The streamed text fragment.
        text: String,
    },
    /// A content block closed.
    BlockStop {
        /// Position of the block in the message content array.
        index: u64,
    },
    /// A complete assistant message.
    Assistant {
        /// Content items in order.
        content: Vec<ContentItem>,
    },
    /// One or more tool outputs.
    ToolResults(Vec<ToolOutput>),
    /// Turn summary.
    Result(ResultSummary),
}

/// One item of an assistant message's content array.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    /// Plain text.
    Text(String),
    /// A tool invocation.
    ToolUse {
        /// Tool name.
        name: String,
        /// Tool input as sent by the agent.
        input: Value,
    },
    /// Any other block type (thinking, images, ...).
    Other,
}

/// Output of a single tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Flattened textual output.
    pub output: String,
    /// Whether the tool reported failure.
    pub is_error: bool,
}

/// Fields of a `result` line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSummary {
    /// CLI session identifier.
    pub session_id: Option<String>,
    /// Turn duration reported by the CLI.
    pub duration_ms: Option<u64>,
    /// Turn cost reported by the CLI.
    pub cost_usd: Option<f64>,
    /// Whether the CLI considered the turn failed.
    pub is_error: bool,
}

// ── Wire shapes ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SessionIdParams {
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockStartParams {
    index: u64,
    content_block: TypedBlock,
}

#[derive(Debug, Deserialize)]
struct TypedBlock {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct BlockDeltaParams {
    index: u64,
    delta: DeltaBody,
}

#[derive(Debug, Deserialize)]
struct DeltaBody {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockStopParams {
    index: u64,
}

#[derive(Debug, Deserialize)]
struct MessageParams {
    message: MessageBody,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: Value,
}

#[derive(Debug, Deserialize)]
struct ToolResultParams {
    content: Option<Value>,
    output: Option<Value>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ResultParams {
    session_id: Option<String>,
    duration_ms: Option<u64>,
    cost_usd: Option<f64>,
    total_cost_usd: Option<f64>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct StreamEventParams {
    event: Value,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parse one stdout line from the agent.
///
/// # Return value
///
/// - `Ok(Some(line))`: a recognised, complete line.
/// - `Ok(None)`: blank line, unknown `type`, or a recognised type missing
///   the fields this runner needs.
/// - `Err(AppError::Stream(...))`: the line is not a JSON object.
///
/// # Errors
///
/// Returns [`AppError::Stream`]`("malformed json: …")` when the line does not
/// parse as JSON or lacks a string `type`.
pub fn parse_line(line: &str) -> Result<Option<AgentLine>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line)
        .map_err(|e| AppError::Stream(format!("malformed json: {e}")))?;
    parse_value(value)
}

fn parse_value(value: Value) -> Result<Option<AgentLine>> {
    let Some(kind) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Err(AppError::Stream("malformed json: missing `type`".into()));
    };

    let parsed = match kind.as_str() {
        "system" => from_value::<SessionIdParams>(value).map(|p| AgentLine::System {
            session_id: p.session_id,
        }),
        "content_block_start" => from_value::<BlockStartParams>(value).map(|p| {
            AgentLine::BlockStart {
                index: p.index,
                is_text: p.content_block.kind == "text",
            }
        }),
        "content_block_delta" => from_value::<BlockDeltaParams>(value).and_then(|p| {
            match (p.delta.kind.as_str(), p.delta.text) {
                ("text_delta", Some(text)) => Some(AgentLine::BlockDelta {
                    index: p.index,
                    text,
                }),
                _ => None,
            }
        }),
        "content_block_stop" => {
            from_value::<BlockStopParams>(value).map(|p| AgentLine::BlockStop { index: p.index })
        }
        "stream_event" => {
            return match from_value::<StreamEventParams>(value) {
                Some(p) => parse_value(p.event),
                None => Ok(None),
            };
        }
        "assistant" => from_value::<MessageParams>(value).map(|p| AgentLine::Assistant {
            content: content_items(&p.message.content),
        }),
        "user" => from_value::<MessageParams>(value).and_then(|p| {
            let results = nested_tool_results(&p.message.content);
            (!results.is_empty()).then_some(AgentLine::ToolResults(results))
        }),
        "tool_result" => from_value::<ToolResultParams>(value).map(|p| {
            let body = p.content.or(p.output).unwrap_or(Value::Null);
            AgentLine::ToolResults(vec![ToolOutput {
                output: flatten_text(&body),
                is_error: p.is_error,
            }])
        }),
        "result" => from_value::<ResultParams>(value).map(|p| {
            AgentLine::Result(ResultSummary {
                session_id: p.session_id,
                duration_ms: p.duration_ms,
                cost_usd: p.cost_usd.or(p.total_cost_usd),
                is_error: p.is_error,
            })
        }),
        other => {
            debug!(line_type = other, "skipping unrecognised agent line");
            None
        }
    };

    Ok(parsed)
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn from_value<T: for<'de> Deserialize<'de>>(value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            debug!(%err, "agent line missing expected fields");
            None
        }
    }
}

fn content_items(content: &Value) -> Vec<ContentItem> {
    let Some(items) = content.as_array() else {
        return match content.as_str() {
            Some(text) => vec![ContentItem::Text(text.to_owned())],
            None => Vec::new(),
        };
    };

    items
        .iter()
        .map(|item| match item.get("type").and_then(Value::as_str) {
            Some("text") => ContentItem::Text(
                item.get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            ),
            Some("tool_use") => ContentItem::ToolUse {
                name: item
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_owned(),
                input: item.get("input").cloned().unwrap_or(Value::Null),
            },
            _ => ContentItem::Other,
        })
        .collect()
}

fn nested_tool_results(content: &Value) -> Vec<ToolOutput> {
    content
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("tool_result"))
                .map(|item| ToolOutput {
                    output: flatten_text(item.get("content").unwrap_or(&Value::Null)),
                    is_error: item
                        .get("is_error")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Collapse a tool result body (string, text-block array, or anything else)
/// into plain text.
fn flatten_text(body: &Value) -> String {
    match body {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item.get("text").and_then(Value::as_str) {
                Some(text) => text.to_owned(),
                None => item.as_str().map_or_else(|| item.to_string(), str::to_owned),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
