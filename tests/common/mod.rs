//! Shared test helpers: scripted session API, recording callbacks, and an
//! in-memory channel connector.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use runlink::config::RunlinkConfig;
use runlink::engine::SessionApi;
use runlink::error::{Result, RunlinkError};
use runlink::stream::{
    pair, ChannelConnector, ChannelSender, EventChannel, RunCallbacks, RunStreamController,
    StreamChannel,
};
use runlink::types::*;

pub const SESSION: &str = "s-1";
pub const RUN: &str = "r-1";

/// Scripted answer to a liveness query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Inactive,
    Fail,
    Denied,
}

/// A session API whose liveness answers come from a queue. Once the queue
/// is empty every query gets `fallback`.
pub struct MockSessionApi {
    answers: Mutex<VecDeque<Liveness>>,
    fallback: Mutex<Liveness>,
    queries: AtomicUsize,
    history: Mutex<Vec<HistoryMessage>>,
    start_result: Mutex<Option<Result<String>>>,
}

impl MockSessionApi {
    pub fn new(fallback: Liveness) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            queries: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
            start_result: Mutex::new(None),
        })
    }

    pub fn scripted(answers: &[Liveness], fallback: Liveness) -> Arc<Self> {
        let api = Self::new(fallback);
        api.answers.lock().unwrap().extend(answers.iter().copied());
        api
    }

    pub fn set_fallback(&self, answer: Liveness) {
        *self.fallback.lock().unwrap() = answer;
    }

    pub fn set_history(&self, history: Vec<HistoryMessage>) {
        *self.history.lock().unwrap() = history;
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionApi for MockSessionApi {
    async fn query_run_active(&self, _session_id: &str) -> Result<RunActivity> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| *self.fallback.lock().unwrap());
        match answer {
            Liveness::Active => Ok(RunActivity::running(RUN)),
            Liveness::Inactive => Ok(RunActivity::idle()),
            Liveness::Fail => Err(RunlinkError::api(502, "bad gateway")),
            Liveness::Denied => Err(RunlinkError::Authentication("invalid token".into())),
        }
    }

    async fn fetch_session_history(&self, _session_id: &str) -> Result<Vec<HistoryMessage>> {
        Ok(self.history.lock().unwrap().clone())
    }

    async fn start_run(&self, _session_id: &str, _prompt: &str) -> Result<String> {
        self.start_result
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(RUN.to_string()))
    }
}

/// Every callback, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    SystemLog(String),
    Delta(String),
    Replaced(String),
    ToolStart(ToolStart),
    ToolEnd(ToolEnd),
    Question(Vec<String>),
    Finalize(RunOutcome),
}

#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    calls: Mutex<Vec<Recorded>>,
}

impl RecordingCallbacks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    pub fn finalizes(&self) -> Vec<RunOutcome> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Recorded::Finalize(outcome) => Some(outcome),
                _ => None,
            })
            .collect()
    }

    pub fn text(&self) -> String {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Recorded::Delta(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn system_logs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Recorded::SystemLog(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn tool_ends(&self) -> Vec<ToolEnd> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Recorded::ToolEnd(end) => Some(end),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Recorded) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RunCallbacks for RecordingCallbacks {
    fn add_system_log(&self, text: &str) {
        self.push(Recorded::SystemLog(text.to_string()));
    }

    fn add_text_delta(&self, text: &str) {
        self.push(Recorded::Delta(text.to_string()));
    }

    fn on_tool_start(&self, start: &ToolStart) {
        self.push(Recorded::ToolStart(start.clone()));
    }

    fn on_tool_end(&self, end: &ToolEnd) {
        self.push(Recorded::ToolEnd(end.clone()));
    }

    fn on_finalize(&self, outcome: RunOutcome) {
        self.push(Recorded::Finalize(outcome));
    }

    fn on_text_replaced(&self, full_text: &str) {
        self.push(Recorded::Replaced(full_text.to_string()));
    }

    fn on_question(&self, question: &QuestionAsked) {
        self.push(Recorded::Question(question.prompts.clone()));
    }
}

/// Hands out queued in-memory channels, one per `connect`.
#[derive(Default)]
pub struct MemoryConnector {
    channels: Mutex<VecDeque<StreamChannel>>,
    connects: Mutex<Vec<(String, String)>>,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a channel for the next attach and return its sender.
    pub fn queue(&self) -> ChannelSender {
        let (tx, rx) = pair();
        self.channels.lock().unwrap().push_back(rx);
        tx
    }

    pub fn connects(&self) -> Vec<(String, String)> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelConnector for MemoryConnector {
    async fn connect(&self, session_id: &str, run_id: &str) -> Result<Box<dyn EventChannel>> {
        self.connects
            .lock()
            .unwrap()
            .push((session_id.to_string(), run_id.to_string()));
        match self.channels.lock().unwrap().pop_front() {
            Some(channel) => Ok(Box::new(channel)),
            None => Err(RunlinkError::Stream("connection refused".into())),
        }
    }
}

/// Config with the documented default timings.
pub fn test_config() -> RunlinkConfig {
    RunlinkConfig::new()
        .with_watchdog_grace(Duration::from_secs(4))
        .with_poll_interval(Duration::from_secs(5))
        .with_idle_timeout(Some(Duration::from_secs(600)))
}

pub fn controller(api: Arc<MockSessionApi>, connector: Arc<MemoryConnector>) -> RunStreamController {
    RunStreamController::new(api, connector, test_config())
}

// Wire event builders, shaped like the engine's run-filtered stream.

pub fn connected() -> Value {
    json!({"type": "server.connected", "properties": {}})
}

/// Greeting the engine sends on every attach.
pub fn run_started() -> Value {
    json!({
        "type": "session.run.started",
        "properties": {"sessionID": SESSION, "runID": RUN, "channel": "system"}
    })
}

/// Published once when the engine accepts the run.
pub fn run_accepted() -> Value {
    json!({
        "type": "session.run.started",
        "properties": {"sessionID": SESSION, "runID": RUN, "startedAtMs": 1}
    })
}

pub fn text_delta(part_id: &str, delta: &str) -> Value {
    json!({
        "type": "message.part.updated",
        "properties": {
            "part": {"id": part_id, "sessionID": SESSION, "messageID": "m-1", "type": "text", "text": delta},
            "delta": delta
        }
    })
}

pub fn text_full(part_id: &str, text: &str) -> Value {
    json!({
        "type": "message.part.updated",
        "properties": {
            "part": {"id": part_id, "sessionID": SESSION, "messageID": "m-1", "type": "text", "text": text}
        }
    })
}

pub fn tool(part_id: &str, name: &str, state: Value) -> Value {
    json!({
        "type": "message.part.updated",
        "properties": {
            "part": {"id": part_id, "sessionID": SESSION, "messageID": "m-1", "type": "tool", "tool": name, "state": state}
        }
    })
}

pub fn run_finished(status: &str) -> Value {
    json!({
        "type": "session.run.finished",
        "properties": {"sessionID": SESSION, "runID": RUN, "finishedAtMs": 1_700_000_000_000u64, "status": status}
    })
}

pub fn session_error(message: &str) -> Value {
    json!({
        "type": "session.error",
        "properties": {"sessionID": SESSION, "error": {"code": "ENGINE_ERROR", "message": message}}
    })
}
