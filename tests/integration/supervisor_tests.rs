//! Worker lifecycle against the real `echo-worker` process.

use std::time::{Duration, Instant};

use std::sync::Arc;

use agent_conductor::config::WorkerConfig;
use agent_conductor::frontend::Frontend;
use agent_conductor::gate::{GateState, SubmitRequest};
use agent_conductor::worker::WorkerState;
use agent_conductor::{AppError, Orchestrator};

use super::test_helpers::{
    orchestrator, session_dir, started, test_config, Event, RecordingFrontend,
};

#[tokio::test]
async fn start_runs_worker_in_first_generation() {
    let frontend = RecordingFrontend::new(false);
    let orch = orchestrator(&[], &frontend);

    assert_eq!(orch.supervisor().generation(), 0);
    assert_eq!(orch.worker_state().await, WorkerState::Stopped);

    assert_eq!(orch.start().await.unwrap(), 1);
    assert_eq!(orch.worker_state().await, WorkerState::Running);
    assert!(orch.supervisor().pid().await.is_some());

    // Starting a live worker is a no-op.
    assert_eq!(orch.start().await.unwrap(), 1);
    orch.shutdown().await;
}

#[tokio::test]
async fn restart_replaces_process_and_advances_generation() {
    let frontend = RecordingFrontend::new(false);
    let orch = started(&[], &frontend).await;
    let first_pid = orch.supervisor().pid().await;

    assert_eq!(orch.supervisor().restart().await.unwrap(), 2);
    assert_eq!(orch.worker_state().await, WorkerState::Running);
    assert_ne!(orch.supervisor().pid().await, first_pid);
    orch.shutdown().await;
}

#[tokio::test]
async fn stop_leaves_no_live_worker() {
    let frontend = RecordingFrontend::new(false);
    let orch = started(&[], &frontend).await;

    orch.shutdown().await;
    assert_eq!(orch.worker_state().await, WorkerState::Stopped);
    assert!(!orch.supervisor().is_alive().await);
    assert!(orch.supervisor().pid().await.is_none());
}

#[tokio::test]
async fn startup_failure_reports_captured_stderr() {
    let frontend = RecordingFrontend::new(false);
    let orch = orchestrator(&["--exit-immediately", "7"], &frontend);

    let err = orch.start().await.unwrap_err();
    let AppError::Startup(message) = err else {
        panic!("expected startup error, got {err}");
    };
    assert!(message.contains("exited immediately"), "{message}");
    assert!(message.contains("refusing to start"), "{message}");

    assert_eq!(orch.worker_state().await, WorkerState::Failed);
    assert!(orch.supervisor().pid().await.is_none());
    assert_eq!(orch.supervisor().generation(), 0);
}

#[tokio::test]
async fn send_restarts_a_dead_worker_exactly_once() {
    let frontend = RecordingFrontend::new(false);
    let orch = started(&[], &frontend).await;
    orch.supervisor().stop().await;

    orch.ping("/any").await.unwrap();
    assert_eq!(orch.supervisor().generation(), 2);
    assert_eq!(orch.worker_state().await, WorkerState::Running);
    orch.shutdown().await;
}

#[tokio::test]
async fn send_surfaces_startup_failure_without_retrying() {
    let frontend = RecordingFrontend::new(false);
    let orch = orchestrator(&["--exit-immediately", "2"], &frontend);

    let err = orch.ping("/any").await.unwrap_err();
    assert!(matches!(err, AppError::Startup(_)));
    assert_eq!(orch.worker_state().await, WorkerState::Failed);
    assert!(frontend
        .user_messages()
        .iter()
        .any(|m| m.starts_with("Worker ping failed")));
}

#[tokio::test]
async fn cancel_kills_worker_that_ignores_termination() {
    let frontend = RecordingFrontend::new(false);
    let orch = started(&["--ignore-term"], &frontend).await;
    let (_dir, session) = session_dir();

    orch.submit(SubmitRequest::prompt(&session, "[hang] think forever"))
        .await
        .unwrap();
    assert!(
        frontend
            .wait_for(Duration::from_secs(5), |f| f
                .chunks(&session)
                .iter()
                .any(|(_, c)| c == "Working..."))
            .await
    );

    let started_at = Instant::now();
    assert!(orch.cancel(&session).await.unwrap());
    assert!(started_at.elapsed() < Duration::from_secs(5));

    assert_eq!(orch.gate_state().await, GateState::Idle);
    assert_eq!(orch.worker_state().await, WorkerState::Running);
    assert_eq!(orch.supervisor().generation(), 2);
    orch.shutdown().await;
}

#[tokio::test]
async fn crashed_worker_is_replaced_by_cancel() {
    let frontend = RecordingFrontend::new(false);
    let orch = started(&[], &frontend).await;
    let (_dir, session) = session_dir();

    orch.submit(SubmitRequest::prompt(&session, "[crash]"))
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while orch.supervisor().is_alive().await && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!orch.supervisor().is_alive().await);
    assert_eq!(orch.gate_state().await, GateState::Busy(session.clone()));

    assert!(orch.cancel(&session).await.unwrap());
    assert_eq!(orch.gate_state().await, GateState::Idle);
    assert!(orch.supervisor().is_alive().await);
    orch.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn write_to_closed_worker_stdin_is_a_transport_failure() {
    let frontend = RecordingFrontend::new(false);
    let mut worker = WorkerConfig::for_program("sh");
    worker.args = vec!["-c".to_owned(), "exec 0<&-; sleep 30".to_owned()];
    worker.startup_grace_ms = 200;
    worker.stop_timeout_ms = 500;
    worker.loop_join_timeout_ms = 1000;
    let sink: Arc<dyn Frontend> = Arc::clone(&frontend) as Arc<dyn Frontend>;
    let orch = Orchestrator::new(test_config(worker), sink).unwrap();
    orch.start().await.unwrap();
    let (_dir, session) = session_dir();

    let err = orch
        .submit(SubmitRequest::prompt(&session, "hello"))
        .await
        .unwrap_err();

    let AppError::Transport(message) = err else {
        panic!("expected transport failure, got {err}");
    };
    assert!(message.starts_with("failed to send message to worker"), "{message}");
    assert_eq!(orch.gate_state().await, GateState::Idle);
    assert_eq!(orch.worker_state().await, WorkerState::Stopped);
    assert!(frontend
        .chunks(&session)
        .iter()
        .any(|(role, content)| role == "error"
            && content.starts_with("[Error sending request to worker:")));
    assert!(frontend.events().contains(&Event::Finished(session.clone())));
}
