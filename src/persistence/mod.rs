//! Persistence layer modules.
//!
//! Every session owns one directory under the store root:
//!
//! ```text
//! <root>/<session_id>/metadata.json   overwritten atomically
//! <root>/<session_id>/events.jsonl    append-only NDJSON
//! ```

pub mod event_log;
pub mod follower;
pub mod metadata_store;

pub use event_log::EventLog;
pub use follower::EventFollower;
pub use metadata_store::MetadataStore;
