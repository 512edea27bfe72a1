//! Session and history shapes returned by the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Answer to "is this session running something right now".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunActivity {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl RunActivity {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn running(run_id: impl Into<String>) -> Self {
        Self {
            active: true,
            run_id: Some(run_id.into()),
        }
    }

    /// Whether the given run is the one still in flight. A session that moved
    /// on to a different run counts as inactive for the old one.
    pub fn is_run_active(&self, run_id: &str) -> bool {
        self.active && self.run_id.as_deref().map_or(true, |id| id == run_id)
    }
}

/// `GET /session/{id}/run` body.
#[derive(Debug, Deserialize)]
pub(crate) struct ActiveRunEnvelope {
    #[serde(default)]
    pub active: Option<ActiveRun>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActiveRun {
    #[serde(rename = "runID")]
    pub run_id: String,
}

/// One persisted message from `GET /session/{id}/message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub info: MessageInfo,
    #[serde(default)]
    pub parts: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default, rename = "sessionID", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl HistoryMessage {
    pub fn is_assistant(&self) -> bool {
        self.info.role.eq_ignore_ascii_case("assistant")
    }

    pub fn is_user(&self) -> bool {
        self.info.role.eq_ignore_ascii_case("user")
    }

    /// Concatenated text of every `text` part.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect()
    }
}
