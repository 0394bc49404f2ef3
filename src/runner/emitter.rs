//! Single publish point for a session's events.
//!
//! Every event is assigned the next id, appended to the event log and then
//! broadcast to subscribers, in that order. A full or absent subscriber
//! never blocks either step.

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::event::{EventType, SessionEvent};
use crate::persistence::EventLog;

/// Message of the synthetic error recorded when the event cap is hit.
pub const EVENT_LIMIT_MESSAGE: &str = "Event limit reached";

/// Result of one [`EventEmitter::emit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    /// The event was recorded with this id.
    Recorded(u64),
    /// The cap was hit: the limit error took the last slot instead.
    LimitReached,
    /// The cap had already been hit; nothing was recorded.
    Dropped,
}

/// Id assignment, persistence and fan-out for one session.
pub struct EventEmitter {
    next_id: u64,
    cap: u64,
    log: Option<EventLog>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl EventEmitter {
    /// Emitter starting at id 0 that records at most `cap` events.
    ///
    /// Without a log, events are only broadcast.
    #[must_use]
    pub fn new(cap: u64, log: Option<EventLog>, events_tx: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            next_id: 0,
            cap,
            log,
            events_tx,
        }
    }

    /// Events recorded so far; also the next id to be assigned.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.next_id
    }

    /// Whether no further events will be recorded.
    #[must_use]
    pub fn limit_reached(&self) -> bool {
        self.next_id >= self.cap
    }

    /// Record and publish one event.
    ///
    /// The last slot below the cap is reserved for the
    /// [`EVENT_LIMIT_MESSAGE`] error, so no id at or above the cap is ever
    /// assigned.
    pub fn emit(&mut self, kind: EventType, data: Value) -> Emission {
        if self.limit_reached() {
            debug!(?kind, "event cap reached, dropping event");
            return Emission::Dropped;
        }

        if self.next_id + 1 == self.cap {
            warn!(limit = self.cap, "event limit reached");
            self.record(
                EventType::Error,
                json!({ "message": EVENT_LIMIT_MESSAGE, "limit": self.cap }),
            );
            return Emission::LimitReached;
        }

        Emission::Recorded(self.record(kind, data))
    }

    fn record(&mut self, kind: EventType, data: Value) -> u64 {
        let event = SessionEvent::new(self.next_id, kind, data);
        self.next_id += 1;

        if let Some(log) = self.log.as_mut() {
            if let Err(err) = log.append(&event) {
                warn!(%err, event_id = event.id, "failed to persist session event");
            }
        }

        let id = event.id;
        // No subscribers is not an error.
        let _ = self.events_tx.send(event);
        id
    }
}
