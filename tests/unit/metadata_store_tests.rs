use chrono::{Duration, Utc};

use agent_session_runner::models::session::{RunnerMode, SessionMetadata, SessionStatus};
use agent_session_runner::persistence::MetadataStore;
use agent_session_runner::AppError;

#[test]
fn save_then_load_returns_snapshot() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = MetadataStore::open(temp.path().join("sessions")).expect("open store");
    let mut meta = SessionMetadata::new("alpha".into(), RunnerMode::PerTurn);
    meta.turn_count = 2;

    store.save(&meta).expect("save");
    let loaded = store.load(&meta.session_id).expect("load");

    assert_eq!(loaded, meta);
    assert!(store.metadata_path(&meta.session_id).is_file());
    assert!(!store
        .session_dir(&meta.session_id)
        .join("metadata.json.tmp")
        .exists());
}

#[test]
fn save_overwrites_previous_snapshot() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = MetadataStore::open(temp.path()).expect("open store");
    let mut meta = SessionMetadata::new("alpha".into(), RunnerMode::PerTurn);
    store.save(&meta).expect("first save");

    meta.mark_ended(SessionStatus::Completed, Utc::now());
    store.save(&meta).expect("second save");

    let loaded = store.load(&meta.session_id).expect("load");
    assert_eq!(loaded.status, SessionStatus::Completed);
    assert!(loaded.ended_at.is_some());
}

#[test]
fn load_unknown_session_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = MetadataStore::open(temp.path()).expect("open store");
    assert!(matches!(store.load("nope"), Err(AppError::NotFound(_))));
}

#[test]
fn path_like_session_ids_are_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = MetadataStore::open(temp.path()).expect("open store");

    for bad in ["..", ".", "", "a/b", "a\\b"] {
        assert!(
            matches!(store.load(bad), Err(AppError::NotFound(_))),
            "{bad:?} must be rejected"
        );
    }
}

#[test]
fn list_is_oldest_first_and_skips_corrupt_entries() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = MetadataStore::open(temp.path()).expect("open store");

    let mut older = SessionMetadata::new("alpha".into(), RunnerMode::PerTurn);
    older.started_at = Utc::now() - Duration::minutes(10);
    let newer = SessionMetadata::new("beta".into(), RunnerMode::LongLived);
    store.save(&newer).expect("save newer");
    store.save(&older).expect("save older");

    let corrupt = temp.path().join("corrupt");
    std::fs::create_dir_all(&corrupt).expect("mkdir");
    std::fs::write(corrupt.join("metadata.json"), b"{ not json").expect("write corrupt");
    std::fs::create_dir_all(temp.path().join("empty")).expect("mkdir");

    let listed = store.list().expect("list");
    let projects: Vec<&str> = listed.iter().map(|m| m.project_id.as_str()).collect();
    assert_eq!(projects, vec!["alpha", "beta"]);
}
