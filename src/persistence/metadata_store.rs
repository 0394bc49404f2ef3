//! Metadata snapshot store: one JSON document per session.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::models::session::SessionMetadata;
use crate::{AppError, Result};

const METADATA_FILE: &str = "metadata.json";
const EVENTS_FILE: &str = "events.jsonl";

/// File-backed store for [`SessionMetadata`] snapshots.
///
/// Each save fully replaces the previous snapshot by writing a sibling
/// temporary file and renaming it over the target, so readers never see a
/// half-written document.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            AppError::Persistence(format!(
                "failed to create session store {}: {err}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all files of one session.
    #[must_use]
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Path of a session's metadata document.
    #[must_use]
    pub fn metadata_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(METADATA_FILE)
    }

    /// Path of a session's event log.
    #[must_use]
    pub fn events_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(EVENTS_FILE)
    }

    /// Overwrite the snapshot for `meta.session_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if serialization or any file
    /// operation fails.
    pub fn save(&self, meta: &SessionMetadata) -> Result<()> {
        validate_session_id(&meta.session_id)?;
        let dir = self.session_dir(&meta.session_id);
        fs::create_dir_all(&dir).map_err(|err| {
            AppError::Persistence(format!("failed to create {}: {err}", dir.display()))
        })?;

        let bytes = serde_json::to_vec_pretty(meta)?;
        let target = dir.join(METADATA_FILE);
        let staging = dir.join(format!("{METADATA_FILE}.tmp"));
        fs::write(&staging, bytes).map_err(|err| {
            AppError::Persistence(format!("failed to write {}: {err}", staging.display()))
        })?;
        fs::rename(&staging, &target).map_err(|err| {
            AppError::Persistence(format!("failed to replace {}: {err}", target.display()))
        })
    }

    /// Load the snapshot for one session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no snapshot exists, or
    /// `AppError::Persistence` if it cannot be read or parsed.
    pub fn load(&self, session_id: &str) -> Result<SessionMetadata> {
        validate_session_id(session_id)?;
        let path = self.metadata_path(session_id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("session {session_id} not found")));
            }
            Err(err) => {
                return Err(AppError::Persistence(format!(
                    "failed to read {}: {err}",
                    path.display()
                )));
            }
        };
        serde_json::from_slice(&raw).map_err(|err| {
            AppError::Persistence(format!("corrupt metadata {}: {err}", path.display()))
        })
    }

    /// Load every readable snapshot in the store, oldest first.
    ///
    /// Unreadable or corrupt snapshots are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the store root cannot be listed.
    pub fn list(&self) -> Result<Vec<SessionMetadata>> {
        let entries = fs::read_dir(&self.root).map_err(|err| {
            AppError::Persistence(format!("failed to list {}: {err}", self.root.display()))
        })?;

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(%err, "skipping unreadable session directory entry");
                    continue;
                }
            };
            if !entry.path().join(METADATA_FILE).is_file() {
                continue;
            }
            let session_id = entry.file_name().to_string_lossy().into_owned();
            match self.load(&session_id) {
                Ok(meta) => sessions.push(meta),
                Err(err) => warn!(session_id, %err, "skipping unreadable session metadata"),
            }
        }

        sessions.sort_by_key(|meta| meta.started_at);
        Ok(sessions)
    }
}

/// Reject identifiers that could escape the store root.
fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id != "."
        && session_id != ".."
        && !session_id.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(AppError::NotFound(format!(
            "invalid session id '{session_id}'"
        )))
    }
}
