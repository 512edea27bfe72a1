//! History reconciliation through the session API seam.

mod common;

use chrono::Utc;
use common::{Liveness, MockSessionApi};
use pretty_assertions::assert_eq;
use runlink::reconcile::HistoryReconciler;
use runlink::types::{HistoryMessage, RunOutcome, RunSummary, ToolStatus};
use serde_json::json;

fn summary(text: &str, outcome: RunOutcome) -> RunSummary {
    RunSummary {
        session_id: "s-1".into(),
        run_id: "r-1".into(),
        outcome,
        server_status: None,
        error: None,
        text: text.into(),
        tools: Vec::new(),
        saw_qualifying_event: true,
        finished_at: Utc::now(),
    }
}

fn history(value: serde_json::Value) -> Vec<HistoryMessage> {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn history_fills_in_a_dropped_stream() {
    let api = MockSessionApi::new(Liveness::Inactive);
    api.set_history(history(json!([
        {"info": {"id": "m-1", "role": "user"}, "parts": [{"type": "text", "text": "fix the build"}]},
        {"info": {"id": "m-2", "role": "assistant"}, "parts": [
            {"type": "text", "text": "Running cargo. "},
            {"type": "tool-invocation", "id": "t-1", "tool": "bash", "state": "running"},
            {"type": "reasoning", "text": "hmm"},
            {"type": "text", "text": "Still going."}
        ]}
    ])));

    let run = HistoryReconciler::new(api)
        .reconcile(&summary("Running", RunOutcome::StreamError))
        .await
        .unwrap();

    assert_eq!(run.outcome, RunOutcome::StreamError);
    assert_eq!(run.text, "Running cargo. Still going.");
    assert!(run.diverged);
    assert_eq!(run.tools.len(), 1);
    assert_eq!(run.tools[0].status, ToolStatus::Started);
    assert_eq!(run.tools[0].part_id.as_deref(), Some("t-1"));
}

#[tokio::test]
async fn matching_history_is_not_divergent() {
    let api = MockSessionApi::new(Liveness::Inactive);
    api.set_history(history(json!([
        {"info": {"id": "m-1", "role": "user"}, "parts": [{"type": "text", "text": "hi"}]},
        {"info": {"id": "m-2", "role": "assistant"}, "parts": [{"type": "text", "text": "hello\n"}]}
    ])));

    let run = HistoryReconciler::new(api)
        .reconcile(&summary("hello", RunOutcome::Completed))
        .await
        .unwrap();
    assert!(!run.diverged);
    assert_eq!(run.message_ids, vec!["m-2"]);
}
