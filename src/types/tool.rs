//! Tool invocation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of one tool invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolStatus {
    Started,
    Completed,
    Failed,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Started)
    }
}

/// One tool call observed on the stream (or recovered from history).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    /// Server-assigned part id, when the engine supplied one.
    pub part_id: Option<String>,
    pub tool_name: String,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unknown for invocations recovered from history without timing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ToolInvocation {
    pub fn started(part_id: Option<String>, tool_name: impl Into<String>) -> Self {
        Self {
            part_id,
            tool_name: tool_name.into(),
            status: ToolStatus::Started,
            result_text: None,
            error: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ToolStatus::Started
    }
}

/// Payload of `on_tool_start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStart {
    pub tool: String,
    pub part_id: Option<String>,
}

/// Payload of `on_tool_end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolEnd {
    pub tool: String,
    pub part_id: Option<String>,
    pub status: ToolStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}
