//! Unit tests for `AppError` display format and conversions.

use agent_conductor::AppError;

#[test]
fn every_variant_has_lowercase_kind_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Startup("x".into()), "startup: x"),
        (AppError::Transport("x".into()), "transport: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::Worker("x".into()), "worker: x"),
        (AppError::ConfirmationDenied("x".into()), "confirmation denied: x"),
        (AppError::Session("x".into()), "session: x"),
        (AppError::Frontend("x".into()), "frontend: x"),
        (AppError::NotFound("x".into()), "not found: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn error_message_no_trailing_period() {
    let err = AppError::Transport("failed to send message to worker: broken pipe".into());
    let s = err.to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

#[test]
fn json_errors_become_protocol_errors() {
    let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let err = AppError::from(parse);
    assert!(matches!(err, AppError::Protocol(ref m) if m.starts_with("malformed json")));
}

#[test]
fn toml_errors_become_config_errors() {
    let parse = toml::from_str::<toml::Value>("= nope").unwrap_err();
    let err = AppError::from(parse);
    assert!(matches!(err, AppError::Config(ref m) if m.starts_with("invalid config")));
}

#[test]
fn io_errors_become_io_errors() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    assert_eq!(AppError::from(io).to_string(), "io: pipe closed");
}
