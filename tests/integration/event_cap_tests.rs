//! The per-session event cap.

use agent_session_runner::models::event::EventType;
use agent_session_runner::models::session::SessionStatus;
use agent_session_runner::runner::emitter::EVENT_LIMIT_MESSAGE;

use super::test_helpers::{
    assert_gapless, assistant_line, logged_events, settings, sh_agent, spawn_runner, temp_store,
    wait_finished,
};

#[tokio::test]
async fn chatty_agent_is_stopped_at_the_cap() {
    let line = assistant_line("spam");
    let script = format!("i=0; while [ $i -lt 20 ]; do printf '%s\\n' '{line}'; i=$((i+1)); done; exec sleep 30");
    let (_temp, store) = temp_store();
    let mut settings = settings(sh_agent(&script));
    settings.max_events = 10;
    let handle = spawn_runner(settings, &store);

    handle.start("talk").await.expect("start");
    let meta = wait_finished(&handle).await;

    assert_eq!(meta.status, SessionStatus::Stopped);
    assert_eq!(meta.error.as_deref(), Some(EVENT_LIMIT_MESSAGE));
    assert_eq!(meta.event_count, 10);

    let events = logged_events(&store, handle.session_id());
    assert_eq!(events.len(), 10);
    assert_gapless(&events);

    let last = events.last().expect("events");
    assert_eq!(last.id, 9);
    assert_eq!(last.kind, EventType::Error);
    assert_eq!(last.message(), Some(EVENT_LIMIT_MESSAGE));
    assert_eq!(last.data["limit"], 10);
    assert!(!events.iter().any(|e| e.message() == Some("Session stopped")));
}

/// A quiet session never touches the cap.
#[tokio::test]
async fn cap_does_not_affect_short_sessions() {
    let script = format!("printf '%s\\n' '{}'; exit 0", assistant_line("hi"));
    let (_temp, store) = temp_store();
    let mut settings = settings(sh_agent(&script));
    settings.max_events = 50;
    let handle = spawn_runner(settings, &store);

    handle.start("hi").await.expect("start");
    handle.stop().await;

    let meta = handle.get_metadata();
    assert_eq!(meta.status, SessionStatus::Stopped);
    assert!(meta.error.is_none());
}
