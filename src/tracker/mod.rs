//! Tool invocation tracker.
//!
//! Pairs asynchronous tool start/end signals. Matching is by server part id
//! when one is supplied; only id-less signals fall back to the most recent
//! open invocation with the same tool name. Two concurrent same-name calls
//! without ids can therefore mis-pair.

use std::collections::HashMap;

use chrono::Utc;

use crate::types::{ToolEnd, ToolInvocation, ToolStart, ToolStatus};

/// A state change the consumer should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolTransition {
    Started(ToolStart),
    Ended(ToolEnd),
}

/// Lifecycle of every tool call seen during one run.
#[derive(Debug, Default)]
pub struct ToolInvocationTracker {
    invocations: Vec<ToolInvocation>,
    /// part_id -> index of its open invocation.
    open_by_id: HashMap<String, usize>,
}

impl ToolInvocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `started` signal. Returns `None` for progress updates on an
    /// invocation that is already open.
    pub fn on_started(&mut self, part_id: Option<&str>, tool_name: &str) -> Option<ToolTransition> {
        if let Some(id) = part_id {
            if self.open_by_id.contains_key(id) {
                return None;
            }
            // A closed invocation with the same id does not reopen.
            if self
                .invocations
                .iter()
                .any(|inv| inv.part_id.as_deref() == Some(id))
            {
                tracing::debug!(part_id = id, tool = tool_name, "ignoring start for finished tool part");
                return None;
            }
        }

        let index = self.invocations.len();
        self.invocations
            .push(ToolInvocation::started(part_id.map(str::to_string), tool_name));
        if let Some(id) = part_id {
            self.open_by_id.insert(id.to_string(), index);
        }
        Some(ToolTransition::Started(ToolStart {
            tool: tool_name.to_string(),
            part_id: part_id.map(str::to_string),
        }))
    }

    pub fn on_completed(
        &mut self,
        part_id: Option<&str>,
        tool_name: &str,
        result: Option<String>,
    ) -> Option<ToolTransition> {
        self.close(part_id, tool_name, ToolStatus::Completed, result, None)
    }

    pub fn on_failed(
        &mut self,
        part_id: Option<&str>,
        tool_name: &str,
        error: impl Into<String>,
    ) -> Option<ToolTransition> {
        self.close(part_id, tool_name, ToolStatus::Failed, None, Some(error.into()))
    }

    fn close(
        &mut self,
        part_id: Option<&str>,
        tool_name: &str,
        status: ToolStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Option<ToolTransition> {
        let index = match part_id {
            Some(id) => self.open_by_id.remove(id),
            None => self
                .invocations
                .iter()
                .rposition(|inv| inv.is_open() && inv.tool_name == tool_name),
        };

        let Some(index) = index else {
            tracing::debug!(
                part_id = part_id.unwrap_or("-"),
                tool = tool_name,
                %status,
                "discarding tool end with no open invocation"
            );
            return None;
        };

        let invocation = &mut self.invocations[index];
        invocation.status = status;
        invocation.result_text = result.clone();
        invocation.error = error.clone();
        invocation.finished_at = Some(Utc::now());

        Some(ToolTransition::Ended(ToolEnd {
            tool: invocation.tool_name.clone(),
            part_id: invocation.part_id.clone(),
            status,
            result,
            error,
        }))
    }

    pub fn invocations(&self) -> &[ToolInvocation] {
        &self.invocations
    }

    pub fn open_count(&self) -> usize {
        self.invocations.iter().filter(|inv| inv.is_open()).count()
    }

    pub fn into_invocations(self) -> Vec<ToolInvocation> {
        self.invocations
    }
}
