//! Unit tests for worker record parsing.

use agent_conductor::models::wire::{parse_worker_line, FinishStatus, WorkerMessage, ROLE_LLM};
use agent_conductor::AppError;
use serde_json::json;

#[test]
fn blank_lines_are_skipped() {
    assert!(parse_worker_line("").unwrap().is_none());
    assert!(parse_worker_line("   ").unwrap().is_none());
}

#[test]
fn stream_defaults_role_and_stringifies_content() {
    let msg = parse_worker_line(r#"{"type":"stream","session":"/p","content":"hi"}"#)
        .unwrap()
        .unwrap();
    assert_eq!(
        msg,
        WorkerMessage::Stream {
            session: "/p".into(),
            role: ROLE_LLM.into(),
            content: "hi".into(),
        }
    );

    let line = r#"{"type":"stream","session":"/p","role":"tool_json_args","content":{"a":1}}"#;
    let msg = parse_worker_line(line).unwrap().unwrap();
    let WorkerMessage::Stream { content, role, .. } = msg else {
        panic!("expected stream");
    };
    assert_eq!(role, "tool_json_args");
    assert_eq!(content, r#"{"a":1}"#);
}

#[test]
fn finished_carries_status_and_history() {
    let line = json!({
        "type": "finished",
        "session": "/p",
        "status": "max_turns_reached",
        "message": "stopped",
        "final_history": [{"role": "user", "content": "x"}],
    })
    .to_string();

    let msg = parse_worker_line(&line).unwrap().unwrap();
    let WorkerMessage::Finished {
        status,
        final_history,
        message,
        ..
    } = msg
    else {
        panic!("expected finished");
    };
    assert_eq!(status, FinishStatus::MaxTurnsReached);
    assert!(status.persists_history());
    assert_eq!(message, "stopped");
    assert_eq!(final_history.map(|h| h.len()), Some(1));
}

#[test]
fn finished_ignores_non_list_history_and_unknown_status() {
    let line = r#"{"type":"finished","session":"/p","status":"exploded","final_history":"nope"}"#;
    let msg = parse_worker_line(line).unwrap().unwrap();
    let WorkerMessage::Finished {
        status,
        final_history,
        ..
    } = msg
    else {
        panic!("expected finished");
    };
    assert_eq!(status, FinishStatus::Unknown);
    assert!(!status.persists_history());
    assert!(final_history.is_none());
}

#[test]
fn only_success_and_max_turns_persist_history() {
    assert!(FinishStatus::Success.persists_history());
    assert!(FinishStatus::MaxTurnsReached.persists_history());
    assert!(!FinishStatus::Error.persists_history());
    assert!(!FinishStatus::Cancelled.persists_history());
}

#[test]
fn error_record_defaults_message() {
    let msg = parse_worker_line(r#"{"type":"error","session":"/p"}"#)
        .unwrap()
        .unwrap();
    assert_eq!(
        msg,
        WorkerMessage::Error {
            session: "/p".into(),
            message: "Unknown error from worker".into(),
        }
    );
}

#[test]
fn terminal_records_accept_structured_fields() {
    let line = r#"{"type":"error","session":"/p","message":{"code":429,"detail":"rate limited"}}"#;
    let msg = parse_worker_line(line).unwrap().unwrap();
    assert_eq!(
        msg,
        WorkerMessage::Error {
            session: "/p".into(),
            message: r#"{"code":429,"detail":"rate limited"}"#.into(),
        }
    );

    let line = r#"{"type":"finished","session":"/p","status":7,"message":{"turns":3}}"#;
    let msg = parse_worker_line(line).unwrap().unwrap();
    let WorkerMessage::Finished {
        status, message, ..
    } = msg
    else {
        panic!("expected finished");
    };
    assert_eq!(status, FinishStatus::Unknown);
    assert_eq!(message, r#"{"turns":3}"#);
}

#[test]
fn pong_and_unknown_types() {
    assert_eq!(
        parse_worker_line(r#"{"type":"pong","session":"/p"}"#).unwrap(),
        Some(WorkerMessage::Pong { session: "/p".into() })
    );
    assert!(parse_worker_line(r#"{"type":"telemetry","session":"/p"}"#)
        .unwrap()
        .is_none());
}

#[test]
fn malformed_records_are_protocol_errors() {
    for line in [
        "not json",
        r#"{"session":"/p"}"#,
        r#"{"type":"stream","content":"no session"}"#,
        r#"{"type":"stream","session":""}"#,
    ] {
        let err = parse_worker_line(line).unwrap_err();
        assert!(matches!(err, AppError::Protocol(_)), "{line}: {err}");
    }
}
