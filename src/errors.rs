//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The agent child process could not be started.
    Spawn(String),
    /// NDJSON framing failure on an agent stream (e.g. oversized line).
    Stream(String),
    /// Metadata or event log could not be read or written.
    Persistence(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// `start()` was called on a session that has already started.
    AlreadyStarted(String),
    /// A message was sent while a turn is still processing.
    NotIdle(String),
    /// The session has reached its terminal state.
    SessionEnded(String),
    /// The project already has a live session.
    ProjectBusy(String),
    /// The global concurrent session ceiling has been reached.
    GlobalLimit(String),
    /// The manager is shutting down and no longer admits sessions.
    ShuttingDown,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Stream(msg) => write!(f, "stream: {msg}"),
            Self::Persistence(msg) => write!(f, "persistence: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::AlreadyStarted(msg) => write!(f, "already started: {msg}"),
            Self::NotIdle(msg) => write!(f, "not idle: {msg}"),
            Self::SessionEnded(msg) => write!(f, "session ended: {msg}"),
            Self::ProjectBusy(msg) => write!(f, "in progress: {msg}"),
            Self::GlobalLimit(msg) => write!(f, "global limit reached: {msg}"),
            Self::ShuttingDown => write!(f, "shutting down: no new sessions accepted"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
