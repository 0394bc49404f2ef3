//! Unit tests for the output tracker: dedupe, tool labelling and truncation.

use serde_json::json;

use agent_session_runner::models::event::EventType;
use agent_session_runner::process::parser::{AgentLine, ContentItem, ResultSummary, ToolOutput};
use agent_session_runner::runner::output::{
    truncate_chars, truncate_lines, OutputTracker, TurnStats, MAX_TOOL_OUTPUT_LINES,
};

fn assistant_text(text: &str) -> AgentLine {
    AgentLine::Assistant {
        content: vec![ContentItem::Text(text.into())],
    }
}

// ── Streaming dedupe ─────────────────────────────────────────────────────────

/// Whole text is emitted when no delta streamed its index.
#[test]
fn whole_text_is_emitted_without_deltas() {
    let mut tracker = OutputTracker::new();
    let outcome = tracker.observe(assistant_text("hello"));

    assert_eq!(
        outcome.events,
        vec![(EventType::AssistantText, json!({ "text": "hello", "delta": false }))]
    );
}

/// Text already streamed through deltas is not repeated by the full message.
#[test]
fn streamed_text_is_not_repeated() {
    let mut tracker = OutputTracker::new();

    let start = tracker.observe(AgentLine::BlockStart {
        index: 0,
        is_text: true,
    });
    assert!(start.events.is_empty());
    assert_eq!(tracker.active_block(), Some(0));

    let delta = tracker.observe(AgentLine::BlockDelta {
        index: 0,
        text: "hel".into(),
    });
    assert_eq!(delta.events.len(), 1);
    assert_eq!(delta.events[0].1["delta"], true);

    tracker.observe(AgentLine::BlockStop { index: 0 });
    assert_eq!(tracker.active_block(), None);

    let full = tracker.observe(assistant_text("hello"));
    assert!(full.events.is_empty(), "streamed text must not be emitted twice");
}

/// Only indices that streamed are suppressed.
#[test]
fn unstreamed_index_in_same_message_is_emitted() {
    let mut tracker = OutputTracker::new();
    tracker.observe(AgentLine::BlockDelta {
        index: 0,
        text: "first".into(),
    });

    let outcome = tracker.observe(AgentLine::Assistant {
        content: vec![
            ContentItem::Text("first".into()),
            ContentItem::Text("second".into()),
        ],
    });

    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].1["text"], "second");
}

#[test]
fn empty_delta_emits_nothing() {
    let mut tracker = OutputTracker::new();
    let outcome = tracker.observe(AgentLine::BlockDelta {
        index: 0,
        text: String::new(),
    });
    assert!(outcome.events.is_empty());
}

// ── Tools ────────────────────────────────────────────────────────────────────

#[test]
fn tool_result_is_labelled_with_last_tool() {
    let mut tracker = OutputTracker::new();
    let tool_use = tracker.observe(AgentLine::Assistant {
        content: vec![ContentItem::ToolUse {
            name: "Grep".into(),
            input: json!({ "pattern": "fn" }),
        }],
    });
    assert_eq!(
        tool_use.events,
        vec![(EventType::ToolUse, json!({ "tool": "Grep", "input": { "pattern": "fn" } }))]
    );
    assert_eq!(tracker.last_tool(), Some("Grep"));

    let result = tracker.observe(AgentLine::ToolResults(vec![ToolOutput {
        output: "src/lib.rs".into(),
        is_error: false,
    }]));
    assert_eq!(
        result.events,
        vec![(
            EventType::ToolResult,
            json!({
                "tool": "Grep",
                "output": "src/lib.rs",
                "truncated": false,
                "totalLines": 1,
                "isError": false,
            })
        )]
    );
}

#[test]
fn tool_result_without_tool_use_is_unknown() {
    let mut tracker = OutputTracker::new();
    let outcome = tracker.observe(AgentLine::ToolResults(vec![ToolOutput {
        output: "x".into(),
        is_error: true,
    }]));
    assert_eq!(outcome.events[0].1["tool"], "unknown");
    assert_eq!(outcome.events[0].1["isError"], true);
}

/// 500 lines of tool output keep 200 lines plus a marker.
#[test]
fn long_tool_output_is_truncated() {
    let output = (1..=500).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
    let mut tracker = OutputTracker::new();
    let outcome = tracker.observe(AgentLine::ToolResults(vec![ToolOutput {
        output,
        is_error: false,
    }]));

    let data = &outcome.events[0].1;
    let text = data["output"].as_str().expect("output is a string");
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(data["truncated"], true);
    assert_eq!(data["totalLines"], 500);
    assert_eq!(lines.len(), MAX_TOOL_OUTPUT_LINES + 1);
    assert_eq!(lines[199], "line 200");
    assert_eq!(lines[200], "[... truncated, 500 total lines]");
}

// ── Turn bookkeeping ─────────────────────────────────────────────────────────

#[test]
fn result_captures_session_and_stats() {
    let mut tracker = OutputTracker::new();
    let outcome = tracker.observe(AgentLine::Result(ResultSummary {
        session_id: Some("cli-9".into()),
        duration_ms: Some(2500),
        cost_usd: Some(0.125),
        is_error: false,
    }));

    assert_eq!(outcome.cli_session_id.as_deref(), Some("cli-9"));
    assert!(outcome.result.is_some());
    // The turn summary is emitted once, at turn end.
    assert!(outcome.events.is_empty());

    let stats = tracker.finish_turn();
    assert_eq!(stats.duration_ms, Some(2500));
    assert_eq!(stats.cost_usd, Some(0.125));
}

#[test]
fn result_without_figures_records_no_stats() {
    let mut tracker = OutputTracker::new();
    let outcome = tracker.observe(AgentLine::Result(ResultSummary::default()));
    assert!(outcome.events.is_empty());
    assert!(outcome.result.is_some());
    assert_eq!(tracker.finish_turn(), TurnStats::default());
}

#[test]
fn finish_turn_resets_scratch_state() {
    let mut tracker = OutputTracker::new();
    tracker.observe(AgentLine::BlockStart {
        index: 0,
        is_text: true,
    });
    tracker.observe(AgentLine::Assistant {
        content: vec![ContentItem::ToolUse {
            name: "Edit".into(),
            input: json!({}),
        }],
    });
    tracker.observe(AgentLine::BlockDelta {
        index: 0,
        text: "partial".into(),
    });

    let stats = tracker.finish_turn();
    assert_eq!(stats.duration_ms, None);
    assert_eq!(tracker.last_tool(), None);
    assert_eq!(tracker.active_block(), None);

    // Index 0 is no longer considered streamed.
    let outcome = tracker.observe(assistant_text("fresh"));
    assert_eq!(outcome.events.len(), 1);
}

// ── Truncation helpers ───────────────────────────────────────────────────────

#[test]
fn truncate_chars_counts_characters_not_bytes() {
    let text = "é".repeat(600);
    let (kept, truncated) = truncate_chars(&text, 500);
    assert!(truncated);
    assert_eq!(kept.chars().count(), 500);

    let (kept, truncated) = truncate_chars("short", 500);
    assert!(!truncated);
    assert_eq!(kept, "short");
}

#[test]
fn truncate_lines_at_limit_is_untouched() {
    let text = "a\nb\nc";
    let out = truncate_lines(text, 3);
    assert!(!out.truncated);
    assert_eq!(out.total_lines, 3);
    assert_eq!(out.text, text);
}
