//! Startup reconciliation of orphaned sessions.
//!
//! A session whose metadata still says `running` when the host starts has
//! no runner: the previous host process died while it was live. Each such
//! orphan is closed out as `failed`, with a trailing `error` event that
//! continues its event log, so nothing stale ever looks current.

use chrono::Utc;
use serde_json::json;
use tracing::{info, info_span, warn};

use crate::models::event::{EventType, SessionEvent};
use crate::models::session::{SessionMetadata, SessionStatus};
use crate::persistence::{EventLog, MetadataStore};
use crate::process::process_exists;
use crate::Result;

/// Error recorded on sessions closed by recovery.
pub const INTERRUPTED_MESSAGE: &str = "Session interrupted by host restart";

/// Outcome of one recovery pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Sessions moved to a terminal status.
    pub reconciled: Vec<String>,
    /// Sessions that could not be reconciled, with the reason.
    pub failures: Vec<(String, String)>,
}

impl RecoveryReport {
    /// Whether nothing needed reconciling.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reconciled.is_empty() && self.failures.is_empty()
    }
}

/// Close out every `running` session for which `is_live` returns `false`.
///
/// Sessions recorded as owned by another host process that is still running
/// are skipped, so a standalone pass cannot fail a live host's sessions.
///
/// Per-session failures are logged and reported; they do not stop the pass.
///
/// # Errors
///
/// Returns `AppError::Persistence` if the store cannot be listed.
pub fn recover_orphans(store: &MetadataStore, is_live: impl Fn(&str) -> bool) -> Result<RecoveryReport> {
    let span = info_span!("recover_orphans", root = %store.root().display());
    let _guard = span.enter();

    let mut report = RecoveryReport::default();
    for meta in store.list()? {
        if meta.status != SessionStatus::Running || is_live(&meta.session_id) {
            continue;
        }
        if let Some(host_pid) = owning_host_alive(&meta) {
            info!(
                session_id = meta.session_id.as_str(),
                host_pid, "session belongs to a running host, leaving it alone"
            );
            continue;
        }

        let session_id = meta.session_id.clone();
        match reconcile(store, meta) {
            Ok(()) => {
                info!(session_id = session_id.as_str(), "orphaned session marked failed");
                report.reconciled.push(session_id);
            }
            Err(err) => {
                warn!(session_id = session_id.as_str(), %err, "failed to reconcile orphaned session");
                report.failures.push((session_id, err.to_string()));
            }
        }
    }

    info!(
        reconciled = report.reconciled.len(),
        failures = report.failures.len(),
        "startup recovery complete"
    );
    Ok(report)
}

/// The pid of another host process that still owns `meta`, if it is running.
fn owning_host_alive(meta: &SessionMetadata) -> Option<u32> {
    meta.host_pid
        .filter(|pid| *pid != std::process::id())
        .filter(|pid| process_exists(*pid))
}

fn reconcile(store: &MetadataStore, mut meta: SessionMetadata) -> Result<()> {
    let events_path = store.events_path(&meta.session_id);
    let next_id = EventLog::last_event_id(&events_path)?.map_or(0, |id| id + 1);

    let event = SessionEvent::new(
        next_id,
        EventType::Error,
        json!({
            "message": INTERRUPTED_MESSAGE,
            "interrupted": true,
            "previousState": meta.state,
            "turn": meta.turn_count,
        }),
    );
    EventLog::open(&events_path)?.append(&event)?;

    meta.error = Some(INTERRUPTED_MESSAGE.to_owned());
    meta.event_count = next_id + 1;
    meta.mark_ended(SessionStatus::Failed, Utc::now());
    store.save(&meta)
}
