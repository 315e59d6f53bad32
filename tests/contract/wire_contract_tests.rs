//! Exact JSON shapes written to the worker's stdin.

use agent_conductor::models::session::{ChatMessage, HistoryEntry};
use agent_conductor::models::wire::{
    parse_worker_line, FinishStatus, InteractionRequest, ModelSettings, WorkerMessage,
    WorkerRequest,
};
use serde_json::{json, Value};

fn request() -> WorkerRequest {
    WorkerRequest::InteractionRequest {
        data: InteractionRequest {
            session_path: "/proj".into(),
            prompt: "next".into(),
            history: vec![
                HistoryEntry {
                    timestamp: 1.5,
                    message: ChatMessage::user("first"),
                },
                HistoryEntry {
                    timestamp: 2.0,
                    message: ChatMessage::user("next"),
                },
            ],
            config: ModelSettings {
                model: "openai/gpt-4o".into(),
                api_key: None,
                base_url: Some("http://localhost:8080".into()),
                verbose: true,
            },
            chat_files: vec!["src/lib.rs".into()],
            context: "## File: src/lib.rs".into(),
        },
    }
}

#[test]
fn interaction_request_shape() {
    let line = request().to_line().unwrap();
    assert_eq!(line.last(), Some(&b'\n'));

    let value: Value = serde_json::from_slice(&line).unwrap();
    assert_eq!(
        value,
        json!({
            "type": "interaction_request",
            "data": {
                "session_path": "/proj",
                "prompt": "next",
                "history": [
                    [1.5, {"role": "user", "content": "first"}],
                    [2.0, {"role": "user", "content": "next"}],
                ],
                "config": {
                    "model": "openai/gpt-4o",
                    "api_key": null,
                    "base_url": "http://localhost:8080",
                    "verbose": true,
                },
                "chat_files": ["src/lib.rs"],
                "context": "## File: src/lib.rs",
            },
        })
    );
}

#[test]
fn request_is_a_single_line() {
    let mut req = request();
    if let WorkerRequest::InteractionRequest { data } = &mut req {
        data.prompt = "multi\nline\nprompt".into();
    }
    let line = req.to_line().unwrap();
    assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
}

#[test]
fn ping_shape() {
    let line = WorkerRequest::Ping {
        session: "/proj".into(),
    }
    .to_line()
    .unwrap();
    let value: Value = serde_json::from_slice(&line).unwrap();
    assert_eq!(value, json!({"type": "ping", "session": "/proj"}));
}

#[test]
fn extra_message_fields_survive_the_history_pair() {
    let raw = json!([3.25, {"role": "assistant", "content": "", "tool_calls": [{"id": "t1"}]}]);
    let entry: HistoryEntry = serde_json::from_value(raw.clone()).unwrap();
    assert!((entry.timestamp - 3.25).abs() < f64::EPSILON);
    assert!(entry.message.extra.contains_key("tool_calls"));
    assert_eq!(serde_json::to_value(&entry).unwrap(), raw);
}

#[test]
fn worker_records_parse_back_from_their_own_encoding() {
    let finished = WorkerMessage::Finished {
        session: "/proj".into(),
        status: FinishStatus::Success,
        message: "done".into(),
        final_history: None,
    };
    let encoded = finished.to_json().unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(&encoded).unwrap(),
        json!({"type": "finished", "session": "/proj", "status": "success", "message": "done"})
    );
    assert_eq!(parse_worker_line(&encoded).unwrap(), Some(finished));
}
