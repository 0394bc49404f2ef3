use std::time::Duration;

use serde_json::json;

use agent_session_runner::models::event::{EventType, SessionEvent};
use agent_session_runner::persistence::{EventFollower, EventLog};

#[tokio::test]
async fn follower_reads_only_new_events() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("events.jsonl");
    let mut log = EventLog::open(&path).expect("open");
    log.append(&SessionEvent::new(0, EventType::System, json!({})))
        .expect("append");

    let mut follower = EventFollower::new(&path).expect("follower");
    let first = follower.read_new().expect("read");
    assert_eq!(first.len(), 1);
    assert!(follower.offset() > 0);

    assert!(follower.read_new().expect("read").is_empty());

    log.append(&SessionEvent::new(1, EventType::TurnStart, json!({ "turn": 1 })))
        .expect("append");
    follower.wait(Duration::from_millis(200)).await;

    let second = follower.read_new().expect("read");
    assert_eq!(second.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1]);
}

#[tokio::test]
async fn wait_returns_after_fallback_without_changes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut follower = EventFollower::new(temp.path().join("events.jsonl")).expect("follower");

    let started = std::time::Instant::now();
    follower.wait(Duration::from_millis(50)).await;
    assert!(started.elapsed() < Duration::from_secs(5));
}
