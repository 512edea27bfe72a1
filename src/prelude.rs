//! Convenience re-exports for common use.

pub use crate::config::RunlinkConfig;
pub use crate::engine::{EngineClient, SessionApi};
pub use crate::error::{Result, RunlinkError};
pub use crate::reconcile::{HistoryReconciler, ReconciledRun};
pub use crate::stream::{AttachOptions, RunCallbacks, RunHandle, RunStreamController};
pub use crate::types::{
    QuestionAsked, RunActivity, RunOutcome, RunSummary, ToolEnd, ToolInvocation, ToolStart,
    ToolStatus,
};
