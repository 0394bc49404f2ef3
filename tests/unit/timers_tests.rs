use std::time::Duration;

use agent_session_runner::runner::timers::{SessionClock, SessionTimers};

#[test]
fn new_timers_have_no_deadline() {
    let timers = SessionTimers::new();
    assert!(timers.next_deadline().is_none());
    assert!(!timers.is_armed(SessionClock::Lifetime));
}

#[test]
fn earliest_deadline_wins() {
    let mut timers = SessionTimers::new();
    timers.arm(SessionClock::Lifetime, Duration::from_secs(3600));
    timers.arm(SessionClock::Turn, Duration::from_secs(60));
    timers.arm(SessionClock::Idle, Duration::from_secs(600));

    let (clock, _) = timers.next_deadline().expect("deadline armed");
    assert_eq!(clock, SessionClock::Turn);

    timers.cancel(SessionClock::Turn);
    let (clock, _) = timers.next_deadline().expect("deadline armed");
    assert_eq!(clock, SessionClock::Idle);
}

#[test]
fn rearming_replaces_deadline() {
    let mut timers = SessionTimers::new();
    timers.arm(SessionClock::Turn, Duration::from_secs(60));
    let (_, first) = timers.next_deadline().expect("armed");

    timers.arm(SessionClock::Turn, Duration::from_secs(1));
    let (_, second) = timers.next_deadline().expect("armed");
    assert!(second < first);
}

#[test]
fn clear_all_disarms_every_clock() {
    let mut timers = SessionTimers::new();
    timers.arm(SessionClock::Turn, Duration::from_secs(1));
    timers.arm(SessionClock::Idle, Duration::from_secs(1));
    timers.arm(SessionClock::Lifetime, Duration::from_secs(1));

    timers.clear_all();

    assert!(timers.next_deadline().is_none());
    for clock in [SessionClock::Turn, SessionClock::Idle, SessionClock::Lifetime] {
        assert!(!timers.is_armed(clock));
    }
}

#[test]
fn unrepresentable_duration_leaves_clock_disarmed() {
    let mut timers = SessionTimers::new();
    timers.arm(SessionClock::Lifetime, Duration::MAX);
    assert!(!timers.is_armed(SessionClock::Lifetime));
}
