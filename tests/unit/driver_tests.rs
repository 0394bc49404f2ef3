//! Unit tests for the turn strategies.

use agent_session_runner::driver::{driver_for, TurnDriver};
use agent_session_runner::driver::long_lived::user_message_line;
use agent_session_runner::models::session::RunnerMode;

#[test]
fn only_long_lived_treats_result_as_turn_boundary() {
    assert!(!driver_for(RunnerMode::PerTurn).result_ends_turn());
    assert!(driver_for(RunnerMode::LongLived).result_ends_turn());
}

#[test]
fn user_message_line_is_single_line_json() {
    let line = user_message_line("multi\nline \"quoted\"");
    assert!(!line.contains('\n'));

    let value: serde_json::Value = serde_json::from_str(&line).expect("valid json");
    assert_eq!(value["type"], "user");
    assert_eq!(value["message"]["role"], "user");
    assert_eq!(value["message"]["content"][0]["type"], "text");
    assert_eq!(value["message"]["content"][0]["text"], "multi\nline \"quoted\"");
}
