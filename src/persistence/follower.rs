//! Live tailing of a session's event log.
//!
//! [`EventFollower`] keeps a byte offset into `events.jsonl` and uses the
//! `notify` crate to wake up when the session directory changes. Reads only
//! consume complete lines, so a line being written is picked up on the next
//! wake-up. A periodic fallback covers platforms where notifications are
//! coalesced or lost.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::event::SessionEvent;
use crate::persistence::EventLog;
use crate::{AppError, Result};

fn is_log_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Incremental reader for one event log.
pub struct EventFollower {
    path: PathBuf,
    offset: u64,
    wake_rx: mpsc::Receiver<()>,
    watcher: Option<RecommendedWatcher>,
}

impl EventFollower {
    /// Follow the log at `path` from its beginning.
    ///
    /// If the directory cannot be watched the follower still works, relying
    /// on the fallback interval passed to [`wait`](Self::wait).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if `path` has no parent directory.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| AppError::Io(format!("{} has no parent directory", path.display())))?;

        // Capacity one: a pending wake-up already covers any later change.
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_log_change(&event) => {
                    let _ = wake_tx.try_send(());
                }
                Err(err) => warn!(%err, "event log watcher error"),
                _ => {}
            },
        )
        .and_then(|mut watcher| {
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            Ok(watcher)
        });

        let watcher = match watcher {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(%err, dir = %dir.display(), "cannot watch session directory, polling instead");
                None
            }
        };

        Ok(Self {
            path,
            offset: 0,
            wake_rx,
            watcher,
        })
    }

    /// Byte offset just past the last complete line consumed.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read every complete event appended since the previous call.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the log exists but cannot be read.
    pub fn read_new(&mut self) -> Result<Vec<SessionEvent>> {
        let (events, next) = EventLog::read_after(&self.path, self.offset)?;
        if next != self.offset {
            debug!(from = self.offset, to = next, count = events.len(), "read appended events");
        }
        self.offset = next;
        Ok(events)
    }

    /// Wait for a change notification, or at most `fallback`.
    pub async fn wait(&mut self, fallback: Duration) {
        if self.watcher.is_none() {
            tokio::time::sleep(fallback).await;
            return;
        }
        let _ = tokio::time::timeout(fallback, self.wake_rx.recv()).await;
    }
}
