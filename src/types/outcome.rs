//! Terminal run outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::tool::ToolInvocation;

/// How a run ended, as far as this client can tell.
///
/// `Completed` and `Failed` are asserted by the engine. `Timeout`,
/// `Inactive` and `InactiveNoEvents` are inferred locally from silence or a
/// liveness query. `StreamError` means the push channel itself broke.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed,
    Timeout,
    StreamError,
    Inactive,
    InactiveNoEvents,
}

impl RunOutcome {
    /// Map an engine run status onto an outcome. Returns `None` for statuses
    /// that do not end a run (`running`, `queued`, ...).
    pub fn from_server_status(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "done" | "success" | "succeeded" => Some(Self::Completed),
            "timeout" | "timed_out" => Some(Self::Timeout),
            "error" | "failed" | "failure" | "cancelled" | "canceled" | "aborted" => {
                Some(Self::Failed)
            }
            _ => None,
        }
    }

    /// Whether the engine said so explicitly.
    pub fn is_server_asserted(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the outcome was inferred by the client.
    pub fn is_inferred(self) -> bool {
        matches!(self, Self::Timeout | Self::Inactive | Self::InactiveNoEvents)
    }
}

/// Everything the stream taught us about a run, published once at finalize.
///
/// This is a best-effort reconstruction; consumers should reconcile against
/// session history before trusting it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub session_id: String,
    pub run_id: String,
    pub outcome: RunOutcome,
    /// Raw status string from the terminal engine event, if there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub text: String,
    pub tools: Vec<ToolInvocation>,
    pub saw_qualifying_event: bool,
    pub finished_at: DateTime<Utc>,
}
