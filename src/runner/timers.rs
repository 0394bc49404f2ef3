//! The three session clocks.
//!
//! Clocks are plain deadlines polled by the runner loop rather than spawned
//! timer tasks, so cancelling one is an assignment and [`SessionTimers::clear_all`]
//! leaves nothing behind.

use std::time::Duration;

use tokio::time::Instant;

/// Which clock a deadline belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionClock {
    /// Armed while a turn is in flight.
    Turn,
    /// Armed while the session waits for input.
    Idle,
    /// Armed once at start, covering the whole session.
    Lifetime,
}

/// Deadlines for the turn, idle and lifetime clocks.
#[derive(Debug, Default, Clone)]
pub struct SessionTimers {
    turn: Option<Instant>,
    idle: Option<Instant>,
    lifetime: Option<Instant>,
}

impl SessionTimers {
    /// All clocks disarmed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `clock` to fire `after` from now, replacing any earlier deadline.
    ///
    /// A duration too large to represent leaves the clock disarmed.
    pub fn arm(&mut self, clock: SessionClock, after: Duration) {
        *self.slot(clock) = Instant::now().checked_add(after);
    }

    /// Disarm one clock.
    pub fn cancel(&mut self, clock: SessionClock) {
        *self.slot(clock) = None;
    }

    /// Disarm every clock.
    pub fn clear_all(&mut self) {
        self.turn = None;
        self.idle = None;
        self.lifetime = None;
    }

    /// Whether `clock` currently has a deadline.
    #[must_use]
    pub fn is_armed(&self, clock: SessionClock) -> bool {
        match clock {
            SessionClock::Turn => self.turn.is_some(),
            SessionClock::Idle => self.idle.is_some(),
            SessionClock::Lifetime => self.lifetime.is_some(),
        }
    }

    /// The earliest armed deadline and the clock it belongs to.
    #[must_use]
    pub fn next_deadline(&self) -> Option<(SessionClock, Instant)> {
        [
            (SessionClock::Turn, self.turn),
            (SessionClock::Idle, self.idle),
            (SessionClock::Lifetime, self.lifetime),
        ]
        .into_iter()
        .filter_map(|(clock, deadline)| deadline.map(|at| (clock, at)))
        .min_by_key(|(_, at)| *at)
    }

    fn slot(&mut self, clock: SessionClock) -> &mut Option<Instant> {
        match clock {
            SessionClock::Turn => &mut self.turn,
            SessionClock::Idle => &mut self.idle,
            SessionClock::Lifetime => &mut self.lifetime,
        }
    }
}
