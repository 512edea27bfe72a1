//! Decoded engine stream events.

use serde_json::Value;

/// Session/run identifiers carried by an event, when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventScope {
    pub session_id: Option<String>,
    pub run_id: Option<String>,
}

impl EventScope {
    /// Whether this event may belong to the given run. Missing identifiers
    /// are treated as a match since the run-filtered channel omits them.
    pub fn matches(&self, session_id: &str, run_id: &str) -> bool {
        let session_ok = self.session_id.as_deref().map_or(true, |s| s == session_id);
        let run_ok = self.run_id.as_deref().map_or(true, |r| r == run_id);
        session_ok && run_ok
    }
}

/// One decoded stream message.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    /// Wire `type` discriminator, kept verbatim.
    pub event_type: String,
    pub scope: EventScope,
    pub event: IncomingEvent,
}

/// Every event kind the controller distinguishes.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingEvent {
    /// `message.part.updated` with a `text` part.
    TextPart(TextPartUpdate),
    /// `message.part.updated` with a `tool` part.
    ToolPart(ToolPartUpdate),
    /// `message.part.updated` with any other part type (reasoning, file, ...).
    OtherPart {
        part_type: String,
        part_id: Option<String>,
    },
    /// `session.run.started` as published when the run was accepted.
    RunStarted,
    /// `run.status.updated`.
    RunStatus(StatusChange),
    /// `session.run.finished`.
    RunFinished(StatusChange),
    /// `session.error`.
    SessionError(SessionError),
    /// `session.status`.
    SessionStatus { status: String },
    /// `question.asked`.
    QuestionAsked(QuestionAsked),
    /// Transport greeting or keep-alive; never counts as run activity.
    Connection(ConnectionMarker),
    /// Any other `type`, preserved as-is.
    Unrecognized { properties: Value },
}

impl IncomingEvent {
    /// Whether this event proves the run is producing output. Connection
    /// markers do not.
    pub fn is_qualifying(&self) -> bool {
        !matches!(self, Self::Connection(_))
    }
}

/// Text part payload. `delta` and `full_content` are independent: either,
/// both, or neither may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextPartUpdate {
    pub part_id: Option<String>,
    pub message_id: Option<String>,
    pub delta: Option<String>,
    pub full_content: Option<String>,
    /// Message role when the engine included one.
    pub role: Option<String>,
}

impl TextPartUpdate {
    /// Prompt text echoed back by the engine rather than generated output.
    pub fn is_user_echo(&self) -> bool {
        self.role.as_deref() == Some("user")
    }
}

/// Tool part payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPartUpdate {
    pub part_id: Option<String>,
    pub tool_name: String,
    pub phase: ToolPhase,
    pub input: Option<Value>,
}

/// Where a tool part is in its lifecycle, normalized across the status
/// spellings the engine has used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPhase {
    Started,
    Completed { result: Option<String> },
    Failed { error: String },
    /// A status string we do not recognize.
    Unknown(String),
}

/// Payload of `run.status.updated` and `session.run.finished`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusChange {
    pub status: String,
    pub error: Option<String>,
}

/// Payload of `session.error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub code: Option<String>,
    pub message: String,
}

/// Payload of `question.asked`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionAsked {
    pub request_id: Option<String>,
    /// Question prompts in display order.
    pub prompts: Vec<String>,
    pub raw: Value,
}

/// Connection-lifecycle markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionMarker {
    /// `server.connected`.
    Connected,
    /// `engine.lifecycle.ready`.
    Ready,
    /// `session.run.started` on the `system` channel, synthesized by the
    /// engine on every attach.
    RunStarted,
    /// Any other `server.*` keep-alive.
    KeepAlive(String),
}
