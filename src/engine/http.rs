//! HTTP plumbing shared by the engine client and the SSE connector.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;

use crate::error::{Result, RunlinkError};

pub const TOKEN_HEADER: &str = "x-tandem-token";
pub const CLIENT_ID_HEADER: &str = "x-tandem-client-id";

/// Client for request/response calls, bounded by `request_timeout`.
pub fn api_client(request_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(request_timeout)
        .pool_max_idle_per_host(10)
        .build()
        .map_err(RunlinkError::from)
}

/// Client for long-lived event streams. Only the connect phase is bounded.
pub fn stream_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(RunlinkError::from)
}

/// Headers sent on every engine request.
pub fn engine_headers(api_token: Option<&str>, client_id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(token) = api_token.filter(|t| !t.is_empty()) {
        if let Ok(val) = HeaderValue::from_str(token) {
            headers.insert(TOKEN_HEADER, val);
        }
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, val);
        }
    }
    if let Ok(val) = HeaderValue::from_str(client_id) {
        headers.insert(CLIENT_ID_HEADER, val);
    }
    headers
}

/// Map a non-success engine response onto an error.
pub fn status_to_error(status: u16, body: &str, session_id: &str) -> RunlinkError {
    match status {
        401 | 403 => RunlinkError::Authentication(error_message(body)),
        404 => RunlinkError::NotFound(format!("session {session_id}")),
        409 => conflict_from_body(body, session_id)
            .unwrap_or_else(|| RunlinkError::api(status, error_message(body))),
        _ => RunlinkError::api(status, error_message(body)),
    }
}

fn conflict_from_body(body: &str, session_id: &str) -> Option<RunlinkError> {
    let value: Value = serde_json::from_str(body).ok()?;
    let active_run_id = value
        .get("activeRun")
        .and_then(|a| a.get("runID"))
        .or_else(|| value.get("runID"))
        .and_then(Value::as_str)?
        .to_string();
    let session_id = value
        .get("sessionID")
        .and_then(Value::as_str)
        .unwrap_or(session_id)
        .to_string();
    Some(RunlinkError::RunConflict {
        session_id,
        active_run_id,
        retry_after_ms: value.get("retryAfterMs").and_then(Value::as_u64),
    })
}

/// Pull a readable message out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.as_str().or_else(|| e.get("message")?.as_str()))
                .or_else(|| v.get("message").and_then(Value::as_str))
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
