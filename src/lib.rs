#![forbid(unsafe_code)]

//! Supervised, turn-based sessions for headless AI agent CLIs.

pub mod config;
pub mod driver;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod process;
pub mod runner;

pub use config::{GlobalConfig, RunnerSettings};
pub use errors::{AppError, Result};
pub use orchestrator::{SessionManager, SessionRequest};
pub use runner::{RunnerHandle, SessionOptions};
