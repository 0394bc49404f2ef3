use std::io::Write;

use serde_json::json;

use agent_session_runner::models::event::{EventType, SessionEvent};
use agent_session_runner::persistence::EventLog;

fn event(id: u64) -> SessionEvent {
    SessionEvent::new(id, EventType::System, json!({ "message": format!("event {id}") }))
}

#[test]
fn append_writes_one_line_per_event() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("nested").join("events.jsonl");
    let mut log = EventLog::open(&path).expect("open creates parents");

    for id in 0..3 {
        log.append(&event(id)).expect("append");
    }

    let raw = std::fs::read_to_string(&path).expect("read file");
    assert_eq!(raw.lines().count(), 3);
    assert!(raw.ends_with('\n'));
    assert_eq!(log.path(), path.as_path());
}

#[test]
fn read_from_filters_by_id() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("events.jsonl");
    let mut log = EventLog::open(&path).expect("open");
    for id in 0..5 {
        log.append(&event(id)).expect("append");
    }

    let events = EventLog::read_from(&path, 3).expect("read");
    assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 4]);
}

#[test]
fn missing_log_reads_as_empty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("absent.jsonl");

    assert!(EventLog::read_from(&path, 0).expect("read").is_empty());
    assert_eq!(EventLog::last_event_id(&path).expect("last id"), None);
}

/// Offsets only advance past complete lines, so tailing resumes cleanly.
#[test]
fn read_after_resumes_from_offset_and_skips_partial_tail() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("events.jsonl");
    let mut log = EventLog::open(&path).expect("open");
    log.append(&event(0)).expect("append");

    let (first, offset) = EventLog::read_after(&path, 0).expect("read");
    assert_eq!(first.len(), 1);

    let mut raw = std::fs::OpenOptions::new().append(true).open(&path).expect("reopen");
    raw.write_all(b"{\"id\":1,\"times").expect("write partial");

    let (none, same) = EventLog::read_after(&path, offset).expect("read");
    assert!(none.is_empty());
    assert_eq!(same, offset);
}

#[test]
fn malformed_lines_are_skipped() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("events.jsonl");
    let line = serde_json::to_string(&event(4)).expect("serialize");
    std::fs::write(&path, format!("garbage\n{line}\n")).expect("write");

    let events = EventLog::read_from(&path, 0).expect("read");
    assert_eq!(events.len(), 1);
    assert_eq!(EventLog::last_event_id(&path).expect("last id"), Some(4));
}

/// Reopening after a torn write starts the next event on a fresh line.
#[test]
fn reopen_terminates_torn_tail() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("events.jsonl");
    let line = serde_json::to_string(&event(0)).expect("serialize");
    std::fs::write(&path, format!("{line}\n{{\"id\":1,\"tim")).expect("write");

    let mut log = EventLog::open(&path).expect("reopen");
    log.append(&event(1)).expect("append");

    let ids: Vec<u64> = EventLog::read_from(&path, 0)
        .expect("read")
        .iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec![0, 1]);
}
