//! Unit tests for event id assignment, the event cap and fan-out.

use serde_json::json;
use tokio::sync::broadcast;

use agent_session_runner::models::event::EventType;
use agent_session_runner::persistence::EventLog;
use agent_session_runner::runner::emitter::{Emission, EventEmitter, EVENT_LIMIT_MESSAGE};

#[test]
fn ids_are_gapless_from_zero() {
    let (tx, mut rx) = broadcast::channel(16);
    let mut emitter = EventEmitter::new(100, None, tx);

    for expected in 0..5 {
        assert_eq!(
            emitter.emit(EventType::System, json!({ "n": expected })),
            Emission::Recorded(expected)
        );
    }
    assert_eq!(emitter.count(), 5);

    let ids: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
}

/// The last slot holds the limit error and nothing is recorded afterwards.
#[test]
fn cap_reserves_last_slot_for_limit_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("events.jsonl");
    let log = EventLog::open(&path).expect("open log");
    let (tx, _) = broadcast::channel(16);
    let mut emitter = EventEmitter::new(3, Some(log), tx);

    assert_eq!(emitter.emit(EventType::System, json!({})), Emission::Recorded(0));
    assert_eq!(emitter.emit(EventType::TurnStart, json!({})), Emission::Recorded(1));
    assert_eq!(emitter.emit(EventType::AssistantText, json!({})), Emission::LimitReached);
    assert!(emitter.limit_reached());
    assert_eq!(emitter.emit(EventType::System, json!({})), Emission::Dropped);
    assert_eq!(emitter.count(), 3);

    let events = EventLog::read_from(&path, 0).expect("read log");
    assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(events[2].kind, EventType::Error);
    assert_eq!(events[2].message(), Some(EVENT_LIMIT_MESSAGE));
}

#[test]
fn cap_of_one_records_only_the_limit_error() {
    let (tx, mut rx) = broadcast::channel(4);
    let mut emitter = EventEmitter::new(1, None, tx);

    assert_eq!(emitter.emit(EventType::System, json!({})), Emission::LimitReached);
    let event = rx.try_recv().expect("limit event broadcast");
    assert_eq!(event.id, 0);
    assert_eq!(event.kind, EventType::Error);
}

/// A subscriber that never reads only lags; emission keeps going.
#[test]
fn slow_subscriber_does_not_block_emission() {
    let (tx, mut rx) = broadcast::channel(2);
    let mut emitter = EventEmitter::new(100, None, tx);

    for _ in 0..10 {
        emitter.emit(EventType::AssistantText, json!({ "text": "x" }));
    }
    assert_eq!(emitter.count(), 10);
    assert!(matches!(
        rx.try_recv(),
        Err(broadcast::error::TryRecvError::Lagged(_))
    ));
}
