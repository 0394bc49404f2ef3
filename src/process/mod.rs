//! Agent child process handling.
//!
//! The agent CLI writes newline-delimited JSON on stdout and, in long-lived
//! mode, reads NDJSON user messages on stdin.
//!
//! - `codec`: bounded NDJSON line framing.
//! - `parser`: typed view of recognised stdout lines.
//! - `spawner`: command construction with environment isolation.
//! - `supervisor`: per-process task that owns the [`tokio::process::Child`].

pub mod codec;
pub mod parser;
pub mod spawner;
pub mod supervisor;

pub use spawner::{spawn_agent, LaunchRequest};
pub use supervisor::{process_exists, AgentProcess, ProcessInput};
