use agent_session_runner::AppError;

#[test]
fn admission_errors_read_as_caller_signals() {
    let busy = AppError::ProjectBusy("project alpha already has a live session".into());
    let limit = AppError::GlobalLimit("3 of 3 sessions are live".into());

    assert!(busy.to_string().starts_with("in progress"), "got: {busy}");
    assert!(limit.to_string().starts_with("global limit reached"), "got: {limit}");
    assert!(AppError::ShuttingDown.to_string().contains("shutting down"));
}

#[test]
fn display_prefixes_variant_context() {
    assert_eq!(AppError::Spawn("boom".into()).to_string(), "spawn: boom");
    assert_eq!(AppError::NotIdle("busy".into()).to_string(), "not idle: busy");
    assert_eq!(
        AppError::SessionEnded("gone".into()).to_string(),
        "session ended: gone"
    );
    assert_eq!(
        AppError::AlreadyStarted("twice".into()).to_string(),
        "already started: twice"
    );
}

#[test]
fn io_error_converts_to_io_variant() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg == "disk"));
}

#[test]
fn json_error_converts_to_persistence_variant() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: AppError = json_err.into();
    assert!(matches!(err, AppError::Persistence(_)));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let toml_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
    let err: AppError = toml_err.into();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}
