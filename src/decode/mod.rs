//! Event decoder: one raw stream message in, one [`DecodedEvent`] out.
//!
//! The engine's wire format has drifted over time (delta as string, object,
//! or array; tool state as object or bare string; several status spellings).
//! Everything here normalizes those variants so the controller only sees the
//! shapes in [`crate::types::event`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::RunlinkError;
use crate::types::event::{
    ConnectionMarker, DecodedEvent, EventScope, IncomingEvent, QuestionAsked, SessionError,
    StatusChange, TextPartUpdate, ToolPartUpdate, ToolPhase,
};

/// Why a message could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("message has no type discriminator")]
    MissingType,

    #[error("{event_type} is missing required field `{field}`")]
    MissingField {
        event_type: String,
        field: &'static str,
    },
}

impl From<DecodeError> for RunlinkError {
    fn from(err: DecodeError) -> Self {
        RunlinkError::Decode(err.to_string())
    }
}

/// Decode one raw `data:` payload.
pub fn decode(raw: &str) -> Result<DecodedEvent, DecodeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        // Bare keep-alive frames carry no payload.
        return Ok(DecodedEvent {
            event_type: String::new(),
            scope: EventScope::default(),
            event: IncomingEvent::Connection(ConnectionMarker::KeepAlive(String::new())),
        });
    }
    let value: Value =
        serde_json::from_str(trimmed).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    decode_value(&value)
}

/// Decode an already-parsed message.
pub fn decode_value(value: &Value) -> Result<DecodedEvent, DecodeError> {
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;
    let event_type = obj
        .get("type")
        .or_else(|| obj.get("event"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(DecodeError::MissingType)?
        .to_string();

    // Envelope fields live under `properties`; older builds flattened them.
    let props = obj
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(obj);

    let scope = scope_of(props);
    let event = match event_type.as_str() {
        "server.connected" => IncomingEvent::Connection(ConnectionMarker::Connected),
        "engine.lifecycle.ready" => IncomingEvent::Connection(ConnectionMarker::Ready),
        "session.run.started" if is_attach_greeting(props) => {
            IncomingEvent::Connection(ConnectionMarker::RunStarted)
        }
        "session.run.started" => IncomingEvent::RunStarted,
        t if t.starts_with("server.") => {
            IncomingEvent::Connection(ConnectionMarker::KeepAlive(t.to_string()))
        }
        "message.part.updated" => decode_part(&event_type, props)?,
        "run.status.updated" => IncomingEvent::RunStatus(status_change(props)),
        "session.run.finished" => IncomingEvent::RunFinished(status_change(props)),
        "session.error" => IncomingEvent::SessionError(session_error(props)),
        "session.status" => IncomingEvent::SessionStatus {
            status: session_status(props),
        },
        "question.asked" => IncomingEvent::QuestionAsked(question(props)),
        _ => IncomingEvent::Unrecognized {
            properties: Value::Object(props.clone()),
        },
    };

    Ok(DecodedEvent {
        event_type,
        scope,
        event,
    })
}

/// The attach stream opens with a `session.run.started` on the `system`
/// channel whether or not the run is alive; the one published when the
/// run is accepted carries no channel.
fn is_attach_greeting(props: &Map<String, Value>) -> bool {
    props.get("channel").and_then(Value::as_str) == Some("system")
}

fn decode_part(event_type: &str, props: &Map<String, Value>) -> Result<IncomingEvent, DecodeError> {
    let part = props
        .get("part")
        .and_then(Value::as_object)
        .ok_or_else(|| DecodeError::MissingField {
            event_type: event_type.to_string(),
            field: "part",
        })?;

    let part_id = str_field(part, "id");
    let part_type = part.get("type").and_then(Value::as_str).unwrap_or("text");

    match part_type {
        "text" => {
            let delta = props
                .get("delta")
                .and_then(text_from_delta)
                .or_else(|| part.get("delta").and_then(text_from_delta));
            let full_content = part
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string);
            let role = props
                .get("message")
                .and_then(|m| m.get("role").or_else(|| m.get("info")?.get("role")))
                .or_else(|| part.get("role"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(IncomingEvent::TextPart(TextPartUpdate {
                part_id,
                message_id: str_field(part, "messageID"),
                delta,
                full_content,
                role,
            }))
        }
        "tool" | "tool-invocation" => Ok(IncomingEvent::ToolPart(tool_part(part_id, part))),
        other => Ok(IncomingEvent::OtherPart {
            part_type: other.to_string(),
            part_id,
        }),
    }
}

/// Normalize a persisted tool part from session history.
pub(crate) fn tool_part_from_value(part: &Value) -> Option<ToolPartUpdate> {
    let part = part.as_object()?;
    match part.get("type").and_then(Value::as_str) {
        Some("tool" | "tool-invocation") => Some(tool_part(str_field(part, "id"), part)),
        _ => None,
    }
}

fn tool_part(part_id: Option<String>, part: &Map<String, Value>) -> ToolPartUpdate {
    let tool_name = str_field(part, "tool")
        .or_else(|| str_field(part, "name"))
        .unwrap_or_else(|| "unknown".to_string());
    let state = part.get("state");
    let state_obj = state.and_then(Value::as_object);
    let status = state_obj
        .and_then(|s| s.get("status"))
        .and_then(Value::as_str)
        .or_else(|| state.and_then(Value::as_str))
        .unwrap_or("pending")
        .to_string();
    let input = state_obj
        .and_then(|s| s.get("input"))
        .or_else(|| part.get("args"))
        .filter(|v| !v.is_null())
        .cloned();

    let phase = match status.as_str() {
        "pending" | "running" | "in_progress" => ToolPhase::Started,
        "completed" => {
            let result = state_obj
                .and_then(|s| s.get("output"))
                .or_else(|| part.get("result"))
                .and_then(render_output);
            ToolPhase::Completed { result }
        }
        "failed" | "error" | "cancelled" | "canceled" | "denied" | "rejected" | "aborted"
        | "skipped" | "timeout" | "timed_out" => {
            let error = state_obj
                .and_then(|s| s.get("error"))
                .or_else(|| part.get("error"))
                .and_then(error_message)
                // Some terminal states carry no structured error payload.
                .unwrap_or_else(|| status.clone());
            ToolPhase::Failed { error }
        }
        _ => ToolPhase::Unknown(status.clone()),
    };

    ToolPartUpdate {
        part_id,
        tool_name,
        phase,
        input,
    }
}

fn status_change(props: &Map<String, Value>) -> StatusChange {
    let status = props
        .get("status")
        .and_then(|s| s.as_str().or_else(|| s.get("type")?.as_str()))
        .unwrap_or_default()
        .to_string();
    StatusChange {
        status,
        error: props.get("error").and_then(error_message),
    }
}

fn session_error(props: &Map<String, Value>) -> SessionError {
    let error = props.get("error").unwrap_or(&Value::Null);
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = error_message(error).unwrap_or_else(|| match error {
        Value::Null => "unknown session error".to_string(),
        other => other.to_string(),
    });
    SessionError { code, message }
}

fn session_status(props: &Map<String, Value>) -> String {
    props
        .get("status")
        .and_then(|s| s.as_str().or_else(|| s.get("type")?.as_str()))
        .unwrap_or("unknown")
        .to_string()
}

fn question(props: &Map<String, Value>) -> QuestionAsked {
    let request_id = str_field(props, "id").or_else(|| str_field(props, "requestID"));
    let mut prompts = Vec::new();
    if let Some(items) = props.get("questions").and_then(Value::as_array) {
        for item in items {
            let prompt = item
                .as_str()
                .or_else(|| item.get("question").and_then(Value::as_str))
                .or_else(|| item.get("text").and_then(Value::as_str));
            if let Some(p) = prompt {
                prompts.push(p.to_string());
            }
        }
    }
    if prompts.is_empty() {
        if let Some(p) = props.get("question").and_then(Value::as_str) {
            prompts.push(p.to_string());
        }
    }
    QuestionAsked {
        request_id,
        prompts,
        raw: Value::Object(props.clone()),
    }
}

fn scope_of(props: &Map<String, Value>) -> EventScope {
    let part = props.get("part").and_then(Value::as_object);
    let session_id = str_field(props, "sessionID")
        .or_else(|| str_field(props, "sessionId"))
        .or_else(|| part.and_then(|p| str_field(p, "sessionID")));
    let run_id = str_field(props, "runID").or_else(|| str_field(props, "run_id"));
    EventScope { session_id, run_id }
}

/// Non-empty string field.
fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `delta` may be a string, `{text}`, or an array of either.
fn text_from_delta(delta: &Value) -> Option<String> {
    match delta {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("text").and_then(Value::as_str).map(str::to_string),
        Value::Array(items) => {
            let out: String = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(map) => map.get("text").and_then(Value::as_str),
                    _ => None,
                })
                .collect();
            (!out.is_empty()).then_some(out)
        }
        _ => None,
    }
}

fn render_output(output: &Value) -> Option<String> {
    match output {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn error_message(error: &Value) -> Option<String> {
    match error {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .or_else(|| map.get("data")?.get("message")?.as_str())
            .map(str::to_string),
        _ => None,
    }
}
