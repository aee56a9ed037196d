//! Worker session lifecycle against a mocked worker

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use basrun_common::{Viewport, WorkerClass};
use basrun_engine::client::EXECUTION_ID_HEADER;
use basrun_engine::outcome::FailureKind;
use basrun_engine::{
    CapabilityGap, CapabilityRequirement, CompiledInstruction, EngineCapabilities, EngineError,
    SessionSpec, SessionState, WorkerClient, WorkerSession,
};

const EXEC: &str = "exec-42";

async fn worker() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session/start"))
        .and(header(EXECUTION_ID_HEADER, EXEC))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": "sess-1"})))
        .mount(&server)
        .await;
    server
}

fn session(server: &MockServer, class: WorkerClass) -> WorkerSession {
    let client = WorkerClient::new(server.uri(), Duration::from_secs(5)).unwrap();
    WorkerSession::new(Arc::new(client), EngineCapabilities::for_class(class, 4))
}

fn spec() -> SessionSpec {
    SessionSpec::new("smoke-nav").with_execution_id(EXEC)
}

fn navigate(index: u32) -> CompiledInstruction {
    CompiledInstruction::new(index, format!("n{}", index), "navigate", json!({"url": "http://localhost:8080/"}))
}

async fn mount_run(server: &MockServer, steps: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/session/sess-1/run"))
        .and(header(EXECUTION_ID_HEADER, EXEC))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"steps": steps})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_start_run_close() {
    let server = worker().await;
    mount_run(
        &server,
        json!([{"index": 0, "node_id": "n0", "type": "navigate", "success": true, "duration_ms": 12}]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/session/sess-1/close"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let mut session = session(&server, WorkerClass::Playwright);
    session.start(spec(), &cancel).await.unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.session_id(), Some("sess-1"));

    let outcome = session.run(&navigate(0), &cancel).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.execution_id, EXEC);
    assert_eq!(outcome.node_id, "n0");
    assert_eq!(outcome.duration_ms, 12);

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_instruction_wire_shape() {
    let server = worker().await;
    Mock::given(method("POST"))
        .and(path("/session/sess-1/run"))
        .and(body_partial_json(json!({
            "instruction": {"index": 0, "node_id": "n0", "type": "navigate", "params": {"url": "http://localhost:8080/"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"steps": [
            {"index": 0, "node_id": "n0", "type": "navigate", "success": true}
        ]})))
        .expect(1)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let mut session = session(&server, WorkerClass::Playwright);
    session.start(spec(), &cancel).await.unwrap();
    assert!(session.run(&navigate(0), &cancel).await.unwrap().success);
}

#[tokio::test]
async fn test_capability_gap_fails_before_contacting_worker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": "sess-1"})))
        .expect(0)
        .mount(&server)
        .await;

    let mut session = session(&server, WorkerClass::Browserless);
    let spec = spec()
        .with_viewport(Viewport { width: 3840, height: 2160 })
        .with_requirement(CapabilityRequirement::from_features(["har"]));
    let err = session.start(spec, &CancellationToken::new()).await.unwrap_err();

    match err {
        EngineError::Capability(gaps) => {
            assert!(gaps.iter().any(|g| matches!(g, CapabilityGap::MissingFeature { .. })));
            assert!(gaps.iter().any(|g| matches!(g, CapabilityGap::ViewportWidth { required: 3840, .. })));
        }
        other => panic!("expected capability error, got {other}"),
    }
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_unhealthy_worker_refuses_start() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "browser": {"healthy": false, "error": "chromium crashed"}
        })))
        .mount(&server)
        .await;

    let mut session = session(&server, WorkerClass::Playwright);
    let err = session.start(spec(), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::WorkerUnavailable(ref msg) if msg.contains("chromium crashed")));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_run_requires_running_session() {
    let server = MockServer::start().await;
    let mut session = session(&server, WorkerClass::Playwright);
    let err = session.run(&navigate(0), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState { state: SessionState::New, .. }));
}

#[tokio::test]
async fn test_indices_must_increase() {
    let server = worker().await;
    mount_run(&server, json!([{"index": 0, "node_id": "n0", "type": "navigate", "success": true}])).await;

    let cancel = CancellationToken::new();
    let mut session = session(&server, WorkerClass::Playwright);
    session.start(spec(), &cancel).await.unwrap();

    let err = session.run(&navigate(1), &cancel).await.unwrap_err();
    assert!(matches!(err, EngineError::OutOfOrder { got: 1, .. }));

    session.run(&navigate(0), &cancel).await.unwrap();
    let err = session.run(&navigate(0), &cancel).await.unwrap_err();
    assert!(matches!(err, EngineError::OutOfOrder { last: 0, got: 0 }));

    session.run(&navigate(3), &cancel).await.unwrap();
}

#[tokio::test]
async fn test_failed_step_is_an_outcome_not_an_error() {
    let server = worker().await;
    mount_run(
        &server,
        json!([{"index": 0, "node_id": "n0", "type": "navigate", "success": false, "error": "net::ERR_NAME_NOT_RESOLVED"}]),
    )
    .await;

    let cancel = CancellationToken::new();
    let mut session = session(&server, WorkerClass::Playwright);
    session.start(spec(), &cancel).await.unwrap();

    let outcome = session.run(&navigate(0), &cancel).await.unwrap();
    assert!(!outcome.success);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Engine);
    assert_eq!(failure.message, "net::ERR_NAME_NOT_RESOLVED");
}

#[tokio::test]
async fn test_reset_keeps_session_running() {
    let server = worker().await;
    Mock::given(method("POST"))
        .and(path("/session/sess-1/reset"))
        .and(header(EXECUTION_ID_HEADER, EXEC))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let mut session = session(&server, WorkerClass::Playwright);
    session.reset().await.unwrap();

    session.start(spec(), &cancel).await.unwrap();
    session.reset().await.unwrap();
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test]
async fn test_cancelled_run() {
    let server = worker().await;
    Mock::given(method("POST"))
        .and(path("/session/sess-1/run"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"steps": []}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let mut session = session(&server, WorkerClass::Playwright);
    session.start(spec(), &cancel).await.unwrap();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let err = session.run(&navigate(0), &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
}
