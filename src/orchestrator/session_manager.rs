//! Live-session registry and admission control.
//!
//! The [`SessionManager`] enforces two ceilings at once: one live session
//! per project and a global maximum across projects. A slot is reserved
//! under the registry lock before any process is spawned, so concurrent
//! start requests can never overshoot either ceiling. Slots are released by
//! a reaper task once the runner has finished.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{info, info_span, warn, Instrument};

use crate::config::RunnerSettings;
use crate::models::session::{RunnerMode, SessionMetadata};
use crate::orchestrator::recovery::{recover_orphans, RecoveryReport};
use crate::persistence::MetadataStore;
use crate::runner::{RunnerHandle, SessionOptions};
use crate::{AppError, Result};

/// A request to start a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Owning project; at most one live session per project.
    pub project_id: String,
    /// First prompt.
    pub prompt: String,
    /// Turn strategy; the configured default when `None`.
    pub mode: Option<RunnerMode>,
    /// Per-turn timeout override.
    pub turn_timeout: Option<Duration>,
}

impl SessionRequest {
    /// Request using configured defaults for mode and turn timeout.
    #[must_use]
    pub fn new(project_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            prompt: prompt.into(),
            mode: None,
            turn_timeout: None,
        }
    }
}

enum Slot {
    /// Admitted; the runner is being created.
    Starting,
    Live(RunnerHandle),
}

#[derive(Default)]
struct Registry {
    /// Keyed by project id.
    slots: HashMap<String, Slot>,
    shutting_down: bool,
}

impl Registry {
    fn live(&self) -> impl Iterator<Item = &RunnerHandle> {
        self.slots.values().filter_map(|slot| match slot {
            Slot::Live(handle) => Some(handle),
            Slot::Starting => None,
        })
    }
}

struct Shared {
    settings: Arc<RunnerSettings>,
    store: MetadataStore,
    registry: Mutex<Registry>,
    recovery: RecoveryReport,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, project_id: &str, session_id: &str) {
        let mut registry = self.registry();
        let owned = matches!(
            registry.slots.get(project_id),
            Some(Slot::Live(handle)) if handle.session_id() == session_id
        );
        if owned {
            registry.slots.remove(project_id);
            info!(project_id, session_id, live = registry.slots.len(), "session slot released");
        }
    }
}

/// Owner of every live [`RunnerHandle`]. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Reconcile orphaned sessions, then return a manager ready to accept
    /// starts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the store cannot be listed.
    pub fn bootstrap(settings: RunnerSettings, store: MetadataStore) -> Result<Self> {
        // Nothing is live yet, so every running session is an orphan.
        let recovery = recover_orphans(&store, |_| false)?;
        Ok(Self {
            shared: Arc::new(Shared {
                settings: Arc::new(settings),
                store,
                registry: Mutex::new(Registry::default()),
                recovery,
            }),
        })
    }

    /// What the startup recovery pass did.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.shared.recovery
    }

    /// Metadata store sessions are persisted to.
    #[must_use]
    pub fn store(&self) -> &MetadataStore {
        &self.shared.store
    }

    /// Admit, create and start a session.
    ///
    /// # Errors
    ///
    /// - `AppError::ShuttingDown` after [`stop_all`](Self::stop_all) began.
    /// - `AppError::ProjectBusy` if the project already has a live session.
    /// - `AppError::GlobalLimit` if the global ceiling is reached.
    pub async fn start_session(&self, request: SessionRequest) -> Result<RunnerHandle> {
        let SessionRequest {
            project_id,
            prompt,
            mode,
            turn_timeout,
        } = request;

        self.admit(&project_id)?;

        let options = SessionOptions {
            project_id: project_id.clone(),
            mode,
            turn_timeout,
        };
        let handle = RunnerHandle::spawn(
            Arc::clone(&self.shared.settings),
            self.shared.store.clone(),
            options,
        );
        let session_id = handle.session_id().to_owned();

        let shutting_down = {
            let mut registry = self.shared.registry();
            registry
                .slots
                .insert(project_id.clone(), Slot::Live(handle.clone()));
            registry.shutting_down
        };
        self.spawn_reaper(handle.clone(), project_id.clone());

        if shutting_down {
            handle.stop().await;
            return Err(AppError::ShuttingDown);
        }

        if let Err(err) = handle.start(prompt).await {
            warn!(session_id = session_id.as_str(), %err, "session failed to start");
            handle.stop().await;
            return Err(err);
        }

        info!(
            session_id = session_id.as_str(),
            project_id = project_id.as_str(),
            "session admitted"
        );
        Ok(handle)
    }

    /// Handle of a live session.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<RunnerHandle> {
        self.shared
            .registry()
            .live()
            .find(|handle| handle.session_id() == session_id)
            .cloned()
    }

    /// Forward a follow-up message to a live session.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if no live session has this id.
    /// - Any error of [`RunnerHandle::send_message`].
    pub async fn send_message(&self, session_id: &str, text: impl Into<String>) -> Result<()> {
        self.live_handle(session_id)?.send_message(text).await
    }

    /// Stop one live session and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no live session has this id.
    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        let handle = self.live_handle(session_id)?;
        handle.stop().await;
        self.shared
            .release(&handle.get_metadata().project_id, session_id);
        Ok(())
    }

    /// Refuse new sessions and stop every live one, waiting until each has
    /// finalised its metadata and reaped its agent process.
    pub async fn stop_all(&self) {
        let handles: Vec<RunnerHandle> = {
            let mut registry = self.shared.registry();
            registry.shutting_down = true;
            registry.live().cloned().collect()
        };

        info!(count = handles.len(), "stopping all sessions");
        join_all(handles.iter().map(RunnerHandle::stop)).await;
        for handle in &handles {
            self.shared
                .release(&handle.get_metadata().project_id, handle.session_id());
        }
        info!("all sessions stopped");
    }

    /// Sessions holding a slot, including ones still being created.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.shared.registry().slots.len()
    }

    /// Metadata snapshots of every live session.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<SessionMetadata> {
        self.shared
            .registry()
            .live()
            .map(RunnerHandle::get_metadata)
            .collect()
    }

    fn admit(&self, project_id: &str) -> Result<()> {
        let limit = self.shared.settings.max_concurrent_sessions;
        let mut registry = self.shared.registry();

        if registry.shutting_down {
            return Err(AppError::ShuttingDown);
        }
        if registry.slots.contains_key(project_id) {
            return Err(AppError::ProjectBusy(format!(
                "project {project_id} already has a live session"
            )));
        }
        if registry.slots.len() >= limit {
            return Err(AppError::GlobalLimit(format!(
                "{} of {limit} sessions are live",
                registry.slots.len()
            )));
        }

        registry.slots.insert(project_id.to_owned(), Slot::Starting);
        Ok(())
    }

    fn live_handle(&self, session_id: &str) -> Result<RunnerHandle> {
        self.get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("no live session {session_id}")))
    }

    fn spawn_reaper(&self, handle: RunnerHandle, project_id: String) {
        let shared = Arc::clone(&self.shared);
        let span = info_span!("session_reaper", session_id = handle.session_id());
        tokio::spawn(
            async move {
                handle.finished().await;
                shared.release(&project_id, handle.session_id());
            }
            .instrument(span),
        );
    }
}
