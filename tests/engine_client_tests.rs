//! EngineClient against a wiremock engine.

use pretty_assertions::assert_eq;
use runlink::config::RunlinkConfig;
use runlink::engine::{EngineClient, SessionApi};
use runlink::error::RunlinkError;
use runlink::types::RunActivity;
use serde_json::json;
use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> EngineClient {
    let config = RunlinkConfig::new()
        .with_base_url(server.uri())
        .with_api_token("tk-test");
    EngineClient::new(&config).unwrap()
}

#[tokio::test]
async fn active_run_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session/s-1/run"))
        .and(header("x-tandem-token", "tk-test"))
        .and(header_exists("x-tandem-client-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": {"runID": "r-1", "startedAtMs": 1, "lastActivityAtMs": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let activity = client(&server).query_run_active("s-1").await.unwrap();
    assert_eq!(activity, RunActivity::running("r-1"));
}

#[tokio::test]
async fn null_active_is_idle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session/s-1/run"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": null})))
        .mount(&server)
        .await;

    let activity = client(&server).query_run_active("s-1").await.unwrap();
    assert_eq!(activity, RunActivity::idle());
    assert!(!activity.is_run_active("r-1"));
}

#[tokio::test]
async fn history_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session/s-1/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"info": {"id": "m-1", "role": "user", "sessionID": "s-1"}, "parts": [{"type": "text", "text": "hi"}]},
            {"info": {"id": "m-2", "role": "assistant", "sessionID": "s-1"}, "parts": [{"type": "text", "text": "hello"}]}
        ])))
        .mount(&server)
        .await;

    let history = client(&server).fetch_session_history("s-1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].is_user());
    assert_eq!(history[1].text(), "hello");
}

#[tokio::test]
async fn start_run_returns_run_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/s-1/prompt_async"))
        .and(query_param("return", "run"))
        .and(body_json(json!({"parts": [{"type": "text", "text": "list files"}]})))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "runID": "r-7",
            "attachEventStream": "/event?sessionID=s-1&runID=r-7"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let run_id = client(&server).start_run("s-1", "list files").await.unwrap();
    assert_eq!(run_id, "r-7");
}

#[tokio::test]
async fn conflict_names_the_active_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session/s-1/prompt_async"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "SESSION_RUN_CONFLICT",
            "sessionID": "s-1",
            "activeRun": {"runID": "r-busy"},
            "retryAfterMs": 500,
            "attachEventStream": "/event?sessionID=s-1&runID=r-busy"
        })))
        .mount(&server)
        .await;

    let err = client(&server).start_run("s-1", "again").await.unwrap_err();
    match err {
        RunlinkError::RunConflict {
            active_run_id,
            retry_after_ms,
            ..
        } => {
            assert_eq!(active_run_id, "r-busy");
            assert_eq!(retry_after_ms, Some(500));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn error_statuses_map_to_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session/locked/run"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid token"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/session/missing/message"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/session/flaky/run"))
        .respond_with(ResponseTemplate::new(503).set_body_string("engine restarting"))
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(matches!(
        client.query_run_active("locked").await,
        Err(RunlinkError::Authentication(msg)) if msg == "invalid token"
    ));
    assert!(matches!(
        client.fetch_session_history("missing").await,
        Err(RunlinkError::NotFound(_))
    ));
    let err = client.query_run_active("flaky").await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn malformed_body_is_serialization_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session/s-1/run"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = client(&server).query_run_active("s-1").await.unwrap_err();
    assert!(matches!(err, RunlinkError::Serialization(_)));
}
