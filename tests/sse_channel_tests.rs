//! SSE connector and full attach flow against a wiremock engine.

mod common;

use std::sync::Arc;

use common::RecordingCallbacks;
use pretty_assertions::assert_eq;
use runlink::config::RunlinkConfig;
use runlink::error::RunlinkError;
use runlink::reconcile::HistoryReconciler;
use runlink::stream::{AttachOptions, ChannelConnector, RunStreamController, SseConnector};
use runlink::types::RunOutcome;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse_body(events: &[Value]) -> String {
    events
        .iter()
        .map(|e| format!("data: {e}\n\n"))
        .collect()
}

fn config(server: &MockServer) -> RunlinkConfig {
    RunlinkConfig::new()
        .with_base_url(server.uri())
        .with_api_token("tk-test")
}

async fn mount_stream(server: &MockServer, events: &[Value]) {
    Mock::given(method("GET"))
        .and(path("/event"))
        .and(query_param("sessionID", "s-1"))
        .and(query_param("runID", "r-1"))
        .and(header("x-tandem-token", "tk-test"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(events), "text/event-stream"),
        )
        .mount(server)
        .await;
}

fn delta(text: &str) -> Value {
    json!({
        "type": "message.part.updated",
        "properties": {
            "part": {"id": "p-1", "sessionID": "s-1", "messageID": "m-2", "type": "text", "text": text},
            "delta": text
        }
    })
}

#[tokio::test]
async fn connector_yields_data_then_clean_end() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        &[
            json!({"type": "server.connected", "properties": {}}),
            delta("hi"),
        ],
    )
    .await;

    let connector = SseConnector::new(&config(&server)).unwrap();
    let mut channel = connector.connect("s-1", "r-1").await.unwrap();

    let first: Value = serde_json::from_str(&channel.next_message().await.unwrap().unwrap()).unwrap();
    assert_eq!(first["type"], "server.connected");
    let second: Value = serde_json::from_str(&channel.next_message().await.unwrap().unwrap()).unwrap();
    assert_eq!(second["properties"]["delta"], "hi");
    assert_eq!(channel.next_message().await.unwrap(), None);
    channel.close();
}

#[tokio::test]
async fn rejected_stream_fails_attach() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/event"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid token"})))
        .mount(&server)
        .await;

    let connector = SseConnector::new(&config(&server)).unwrap();
    let err = connector.connect("s-1", "r-1").await.err().unwrap();
    assert!(matches!(err, RunlinkError::Authentication(_)));
}

#[tokio::test]
async fn attach_follows_run_to_completion() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        &[
            json!({"type": "server.connected", "properties": {}}),
            json!({"type": "session.run.started", "properties": {"sessionID": "s-1", "runID": "r-1", "channel": "system"}}),
            delta("Hello"),
            delta(", world"),
            json!({"type": "session.run.finished", "properties": {"sessionID": "s-1", "runID": "r-1", "status": "completed"}}),
        ],
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/session/s-1/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"info": {"id": "m-1", "role": "user"}, "parts": [{"type": "text", "text": "greet"}]},
            {"info": {"id": "m-2", "role": "assistant"}, "parts": [{"type": "text", "text": "Hello, world"}]}
        ])))
        .mount(&server)
        .await;

    let controller = RunStreamController::from_config(config(&server)).unwrap();
    let callbacks = RecordingCallbacks::new();
    let handle = controller
        .attach("s-1", "r-1", callbacks.clone(), AttachOptions::default())
        .await
        .unwrap();

    let summary = handle.wait().await.expect("finalized");
    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.text, "Hello, world");
    assert_eq!(callbacks.finalizes(), vec![RunOutcome::Completed]);

    let run = HistoryReconciler::new(controller.api())
        .reconcile(&summary)
        .await
        .unwrap();
    assert_eq!(run.message_ids, vec!["m-2"]);
    assert!(!run.diverged);
}

#[tokio::test]
async fn stream_end_without_terminal_event_checks_liveness() {
    let server = MockServer::start().await;
    mount_stream(&server, &[delta("partial")]).await;
    Mock::given(method("GET"))
        .and(path("/session/s-1/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": null})))
        .expect(1)
        .mount(&server)
        .await;

    let controller = RunStreamController::from_config(config(&server)).unwrap();
    let handle = controller
        .attach("s-1", "r-1", Arc::new(NoopCallbacks), AttachOptions::default())
        .await
        .unwrap();

    let summary = handle.wait().await.expect("finalized");
    assert_eq!(summary.outcome, RunOutcome::Inactive);
    assert_eq!(summary.text, "partial");
}

struct NoopCallbacks;

impl runlink::stream::RunCallbacks for NoopCallbacks {
    fn add_system_log(&self, _text: &str) {}
    fn add_text_delta(&self, _text: &str) {}
    fn on_text_replaced(&self, _full_text: &str) {}
    fn on_tool_start(&self, _start: &runlink::types::ToolStart) {}
    fn on_tool_end(&self, _end: &runlink::types::ToolEnd) {}
    fn on_finalize(&self, _outcome: RunOutcome) {}
}
