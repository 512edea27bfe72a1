//! Consumer callback contract.

use crate::types::{QuestionAsked, RunOutcome, ToolEnd, ToolStart};

/// Hooks invoked from the stream driver task, in delivery order.
///
/// Implementations should return quickly; the driver does not consume
/// further events until a callback returns.
pub trait RunCallbacks: Send + Sync {
    /// Diagnostic line meant for the run's log view.
    fn add_system_log(&self, text: &str);

    /// Newly appended assistant text.
    fn add_text_delta(&self, text: &str);

    fn on_tool_start(&self, start: &ToolStart);

    fn on_tool_end(&self, end: &ToolEnd);

    /// Called exactly once per handle, unless the handle was detached first.
    fn on_finalize(&self, outcome: RunOutcome);

    /// The accumulated text was rewritten rather than extended; `full_text`
    /// is the whole new buffer and supersedes everything delivered through
    /// [`add_text_delta`](Self::add_text_delta) so far.
    fn on_text_replaced(&self, full_text: &str);

    fn on_question(&self, _question: &QuestionAsked) {}
}
