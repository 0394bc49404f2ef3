//! Session orchestration: admission control and startup recovery.

pub mod recovery;
pub mod session_manager;

pub use recovery::{recover_orphans, RecoveryReport};
pub use session_manager::{SessionManager, SessionRequest};
