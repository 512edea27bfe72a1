//! History reconciliation.
//!
//! The live stream is best-effort. Once a handle finalizes, the session's
//! durable history is the ground truth for what the run produced.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::decode::tool_part_from_value;
use crate::engine::SessionApi;
use crate::error::Result;
use crate::types::{
    HistoryMessage, RunOutcome, RunSummary, ToolInvocation, ToolPhase, ToolStatus,
};

/// A run's output as recorded in session history.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRun {
    pub session_id: String,
    pub run_id: String,
    /// Outcome reported by the stream; history does not record one.
    pub outcome: RunOutcome,
    pub text: String,
    pub tools: Vec<ToolInvocation>,
    /// Assistant messages attributed to the run, oldest first.
    pub message_ids: Vec<String>,
    /// Whether the stream-derived text differs from history.
    pub diverged: bool,
}

/// Fetches history and rebuilds the run's output from it.
#[derive(Clone)]
pub struct HistoryReconciler {
    api: Arc<dyn SessionApi>,
}

impl HistoryReconciler {
    pub fn new(api: Arc<dyn SessionApi>) -> Self {
        Self { api }
    }

    pub async fn reconcile(&self, summary: &RunSummary) -> Result<ReconciledRun> {
        let history = self.api.fetch_session_history(&summary.session_id).await?;
        let reconciled = reconcile_messages(summary, &history);
        if reconciled.diverged {
            tracing::debug!(
                session_id = %summary.session_id,
                run_id = %summary.run_id,
                stream_len = summary.text.len(),
                history_len = reconciled.text.len(),
                "stream text diverged from history"
            );
        }
        Ok(reconciled)
    }
}

/// Attribute the assistant messages after the last user message to the run.
pub fn reconcile_messages(summary: &RunSummary, history: &[HistoryMessage]) -> ReconciledRun {
    let start = history
        .iter()
        .rposition(HistoryMessage::is_user)
        .map_or(0, |i| i + 1);
    let run_messages: Vec<&HistoryMessage> = history[start..]
        .iter()
        .filter(|m| m.is_assistant())
        .collect();

    let text: String = run_messages.iter().map(|m| m.text()).collect();
    let tools = run_messages
        .iter()
        .flat_map(|m| m.parts.iter())
        .filter_map(recovered_tool)
        .collect();

    ReconciledRun {
        session_id: summary.session_id.clone(),
        run_id: summary.run_id.clone(),
        outcome: summary.outcome,
        diverged: summary.text.trim() != text.trim(),
        message_ids: run_messages.iter().map(|m| m.info.id.clone()).collect(),
        text,
        tools,
    }
}

/// Rebuild one tool invocation from a history part. Timestamps come from
/// `state.time` (epoch millis) and stay unset when history has none.
fn recovered_tool(part: &Value) -> Option<ToolInvocation> {
    let update = tool_part_from_value(part)?;
    let (status, result_text, error) = match update.phase {
        ToolPhase::Completed { result } => (ToolStatus::Completed, result, None),
        ToolPhase::Failed { error } => (ToolStatus::Failed, None, Some(error)),
        ToolPhase::Started | ToolPhase::Unknown(_) => (ToolStatus::Started, None, None),
    };
    let finished_at = if status.is_terminal() {
        state_time(part, "end")
    } else {
        None
    };
    Some(ToolInvocation {
        part_id: update.part_id,
        tool_name: update.tool_name,
        status,
        result_text,
        error,
        started_at: state_time(part, "start"),
        finished_at,
    })
}

fn state_time(part: &Value, key: &str) -> Option<DateTime<Utc>> {
    part.get("state")?
        .get("time")?
        .get(key)?
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
}
