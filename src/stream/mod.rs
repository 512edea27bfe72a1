//! Run stream controller.
//!
//! [`RunStreamController::attach`] opens the run's event channel and spawns
//! one driver task per handle. The driver owns the decoder loop, the tool
//! tracker, the text accumulator and the liveness supervisor, so none of that
//! state is shared. The only cross-task state is the [`FinalizeGuard`] the
//! driver and [`RunHandle::detach`] race on.

pub mod callbacks;
pub mod channel;
pub mod guard;

pub use callbacks::RunCallbacks;
pub use channel::{pair, ChannelConnector, ChannelSender, EventChannel, SseConnector, StreamChannel};
pub use guard::FinalizeGuard;

use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RunlinkConfig;
use crate::decode::decode;
use crate::engine::{EngineClient, SessionApi};
use crate::error::{Result, RunlinkError};
use crate::liveness::{LivenessSettings, LivenessSupervisor, LivenessVerdict};
use crate::text::{TextAccumulator, TextChange};
use crate::tracker::{ToolInvocationTracker, ToolTransition};
use crate::types::{IncomingEvent, RunOutcome, RunSummary, StatusChange, ToolPhase};

/// Per-attach overrides of the configured timers.
#[derive(Debug, Clone, Default, Builder)]
pub struct AttachOptions {
    /// Grace period for the first qualifying event.
    pub run_timeout: Option<Duration>,
    pub poll_interval: Option<Duration>,
    /// `Duration::ZERO` disables the idle timeout for this attach.
    pub idle_timeout: Option<Duration>,
}

/// Attaches to runs and hands out [`RunHandle`]s.
pub struct RunStreamController {
    api: Arc<dyn SessionApi>,
    connector: Arc<dyn ChannelConnector>,
    config: RunlinkConfig,
}

impl RunStreamController {
    pub fn new(
        api: Arc<dyn SessionApi>,
        connector: Arc<dyn ChannelConnector>,
        config: RunlinkConfig,
    ) -> Self {
        Self {
            api,
            connector,
            config,
        }
    }

    /// Controller talking to the engine at `config.base_url` over HTTP and SSE.
    pub fn from_config(config: RunlinkConfig) -> Result<Self> {
        let api = Arc::new(EngineClient::new(&config)?);
        let connector = Arc::new(SseConnector::new(&config)?);
        Ok(Self::new(api, connector, config))
    }

    pub fn api(&self) -> Arc<dyn SessionApi> {
        Arc::clone(&self.api)
    }

    pub fn config(&self) -> &RunlinkConfig {
        &self.config
    }

    /// Open the run's channel and start driving it.
    ///
    /// Fails only if the channel cannot be opened; everything after that is
    /// reported through `callbacks` and the returned handle.
    pub async fn attach(
        &self,
        session_id: &str,
        run_id: &str,
        callbacks: Arc<dyn RunCallbacks>,
        options: AttachOptions,
    ) -> Result<RunHandle> {
        if session_id.is_empty() || run_id.is_empty() {
            return Err(RunlinkError::InvalidState(
                "session_id and run_id are required to attach".into(),
            ));
        }
        let settings = self.liveness_settings(&options)?;
        let channel = self.connector.connect(session_id, run_id).await?;

        let attach_id = Uuid::new_v4();
        let shared = Arc::new(HandleShared {
            guard: FinalizeGuard::new(),
            cancel: CancellationToken::new(),
        });
        let (state_tx, state_rx) = watch::channel(HandleState::Running);

        let driver = RunDriver {
            session_id: session_id.to_string(),
            run_id: run_id.to_string(),
            attach_id,
            channel,
            callbacks,
            shared: Arc::clone(&shared),
            supervisor: LivenessSupervisor::new(self.api(), session_id, run_id, settings),
            tracker: ToolInvocationTracker::new(),
            text: TextAccumulator::new(),
            decode_failures: 0,
            max_decode_failures: self.config.max_decode_failures.max(1),
            server_status: None,
            error: None,
            state_tx,
        };
        tracing::debug!(session_id, run_id, %attach_id, "attached to run stream");
        tokio::spawn(driver.run());

        Ok(RunHandle {
            session_id: session_id.to_string(),
            run_id: run_id.to_string(),
            attach_id,
            shared,
            state_rx,
        })
    }

    fn liveness_settings(&self, options: &AttachOptions) -> Result<LivenessSettings> {
        let poll_interval = options.poll_interval.unwrap_or(self.config.poll_interval);
        if poll_interval.is_zero() {
            return Err(RunlinkError::Configuration(
                "poll_interval must be greater than zero".into(),
            ));
        }
        let idle_timeout = match options.idle_timeout {
            Some(limit) if limit.is_zero() => None,
            Some(limit) => Some(limit),
            None => self.config.idle_timeout,
        };
        Ok(LivenessSettings {
            watchdog_grace: options.run_timeout.unwrap_or(self.config.watchdog_grace),
            poll_interval,
            idle_timeout,
            query_timeout: self.config.liveness_query_timeout,
        })
    }
}

impl std::fmt::Debug for RunStreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStreamController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct HandleShared {
    guard: FinalizeGuard,
    cancel: CancellationToken,
}

#[derive(Debug, Clone)]
enum HandleState {
    Running,
    Finalized(Box<RunSummary>),
    Detached,
}

/// One attached run stream. Dropping the handle detaches it.
#[derive(Debug)]
pub struct RunHandle {
    session_id: String,
    run_id: String,
    attach_id: Uuid,
    shared: Arc<HandleShared>,
    state_rx: watch::Receiver<HandleState>,
}

impl RunHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn attach_id(&self) -> Uuid {
        self.attach_id
    }

    /// True once the handle has finalized or been detached.
    pub fn is_finalized(&self) -> bool {
        self.shared.guard.is_claimed()
    }

    /// Outcome, if the run has been finalized and published.
    pub fn outcome(&self) -> Option<RunOutcome> {
        match &*self.state_rx.borrow() {
            HandleState::Finalized(summary) => Some(summary.outcome),
            _ => None,
        }
    }

    /// Stop consuming the run without reporting an outcome. Returns `false`
    /// if the handle had already finalized.
    pub fn detach(&self) -> bool {
        if !self.shared.guard.try_claim() {
            return false;
        }
        tracing::debug!(
            session_id = %self.session_id,
            run_id = %self.run_id,
            attach_id = %self.attach_id,
            "detaching run stream"
        );
        self.shared.cancel.cancel();
        true
    }

    /// Wait for the run to finalize. `None` if it was detached instead.
    pub async fn wait(self) -> Option<RunSummary> {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(|state| !matches!(state, HandleState::Running))
            .await
            .ok()?
            .clone();
        match state {
            HandleState::Finalized(summary) => Some(*summary),
            _ => None,
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

struct RunDriver {
    session_id: String,
    run_id: String,
    attach_id: Uuid,
    channel: Box<dyn EventChannel>,
    callbacks: Arc<dyn RunCallbacks>,
    shared: Arc<HandleShared>,
    supervisor: LivenessSupervisor,
    tracker: ToolInvocationTracker,
    text: TextAccumulator,
    decode_failures: u32,
    max_decode_failures: u32,
    server_status: Option<String>,
    error: Option<String>,
    state_tx: watch::Sender<HandleState>,
}

impl RunDriver {
    async fn run(mut self) {
        let cancel = self.shared.cancel.clone();
        let mut channel_open = true;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                message = self.channel.next_message(), if channel_open => match message {
                    Ok(Some(raw)) => {
                        if let Some(outcome) = self.handle_message(&raw) {
                            break Some(outcome);
                        }
                    }
                    Ok(None) => {
                        tracing::debug!(
                            session_id = %self.session_id,
                            run_id = %self.run_id,
                            "event stream ended without a terminal event"
                        );
                        channel_open = false;
                        self.supervisor.check_after_end_of_stream();
                    }
                    Err(err) => {
                        tracing::warn!(
                            session_id = %self.session_id,
                            run_id = %self.run_id,
                            error = %err,
                            "event stream failed"
                        );
                        self.error = Some(err.to_string());
                        break Some(RunOutcome::StreamError);
                    }
                },
                verdict = self.supervisor.next_verdict() => match verdict {
                    LivenessVerdict::Finalize(outcome) => break Some(outcome),
                    LivenessVerdict::WaitingForDeltas => self
                        .callbacks
                        .add_system_log("Run is still active on the engine, waiting for output"),
                    LivenessVerdict::QueryRejected(message) => self
                        .callbacks
                        .add_system_log(&format!("Engine rejected the run status check: {message}")),
                },
            }
        };

        self.finish(outcome);
    }

    /// Apply one raw message. Returns an outcome when it ends the run.
    fn handle_message(&mut self, raw: &str) -> Option<RunOutcome> {
        let decoded = match decode(raw) {
            Ok(decoded) => {
                self.decode_failures = 0;
                decoded
            }
            Err(err) => {
                self.decode_failures += 1;
                tracing::warn!(
                    session_id = %self.session_id,
                    run_id = %self.run_id,
                    failures = self.decode_failures,
                    error = %err,
                    "undecodable stream message"
                );
                if self.decode_failures >= self.max_decode_failures {
                    self.error = Some(format!(
                        "{} consecutive undecodable messages, last: {err}",
                        self.decode_failures
                    ));
                    return Some(RunOutcome::StreamError);
                }
                return None;
            }
        };

        if !decoded.scope.matches(&self.session_id, &self.run_id) {
            tracing::debug!(
                run_id = %self.run_id,
                event_type = %decoded.event_type,
                "ignoring event for another run"
            );
            return None;
        }
        if decoded.event.is_qualifying() {
            self.supervisor.record_event();
        }

        match decoded.event {
            IncomingEvent::TextPart(update) => {
                if update.is_user_echo() {
                    return None;
                }
                match self.text.apply(
                    update.delta.as_deref(),
                    update.full_content.as_deref(),
                    update.part_id.as_deref(),
                ) {
                    TextChange::Appended(suffix) => self.callbacks.add_text_delta(&suffix),
                    TextChange::Replaced(full) => self.callbacks.on_text_replaced(&full),
                    TextChange::Unchanged => {}
                }
                None
            }
            IncomingEvent::ToolPart(update) => {
                let part_id = update.part_id.as_deref();
                let transition = match update.phase {
                    ToolPhase::Started => self.tracker.on_started(part_id, &update.tool_name),
                    ToolPhase::Completed { result } => {
                        self.tracker.on_completed(part_id, &update.tool_name, result)
                    }
                    ToolPhase::Failed { error } => {
                        self.tracker.on_failed(part_id, &update.tool_name, error)
                    }
                    ToolPhase::Unknown(status) => {
                        tracing::debug!(tool = %update.tool_name, %status, "unknown tool status");
                        None
                    }
                };
                match transition {
                    Some(ToolTransition::Started(start)) => self.callbacks.on_tool_start(&start),
                    Some(ToolTransition::Ended(end)) => self.callbacks.on_tool_end(&end),
                    None => {}
                }
                None
            }
            IncomingEvent::RunStatus(change) => {
                let outcome = RunOutcome::from_server_status(&change.status);
                if outcome.is_none() {
                    tracing::debug!(run_id = %self.run_id, status = %change.status, "run status");
                    return None;
                }
                self.record_server_status(change);
                outcome
            }
            IncomingEvent::RunFinished(change) => {
                let outcome = RunOutcome::from_server_status(&change.status).unwrap_or(
                    if change.error.is_some() {
                        RunOutcome::Failed
                    } else {
                        RunOutcome::Completed
                    },
                );
                self.record_server_status(change);
                Some(outcome)
            }
            IncomingEvent::SessionError(err) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    run_id = %self.run_id,
                    code = err.code.as_deref().unwrap_or("-"),
                    "engine reported session error: {}",
                    err.message
                );
                self.callbacks
                    .add_system_log(&format!("Engine error: {}", err.message));
                self.error = Some(err.message);
                Some(RunOutcome::Failed)
            }
            IncomingEvent::SessionStatus { status } => {
                tracing::debug!(session_id = %self.session_id, %status, "session status");
                None
            }
            IncomingEvent::QuestionAsked(question) => {
                self.callbacks.on_question(&question);
                None
            }
            IncomingEvent::RunStarted => {
                tracing::debug!(run_id = %self.run_id, "run started");
                None
            }
            IncomingEvent::OtherPart { .. }
            | IncomingEvent::Connection(_)
            | IncomingEvent::Unrecognized { .. } => None,
        }
    }

    fn record_server_status(&mut self, change: StatusChange) {
        tracing::debug!(run_id = %self.run_id, status = %change.status, "terminal run status");
        self.server_status = Some(change.status).filter(|s| !s.is_empty());
        if change.error.is_some() {
            self.error = change.error;
        }
    }

    fn finish(mut self, outcome: Option<RunOutcome>) {
        self.supervisor.disarm();
        self.channel.close();

        let outcome = match outcome {
            Some(outcome) if self.shared.guard.try_claim() => outcome,
            _ => {
                tracing::debug!(
                    run_id = %self.run_id,
                    attach_id = %self.attach_id,
                    "run stream detached"
                );
                self.state_tx.send_replace(HandleState::Detached);
                return;
            }
        };

        tracing::debug!(
            session_id = %self.session_id,
            run_id = %self.run_id,
            attach_id = %self.attach_id,
            %outcome,
            "run finalized"
        );
        self.callbacks.on_finalize(outcome);

        let summary = RunSummary {
            session_id: self.session_id,
            run_id: self.run_id,
            outcome,
            server_status: self.server_status,
            error: self.error,
            text: self.text.text(),
            tools: self.tracker.into_invocations(),
            saw_qualifying_event: self.supervisor.state().saw_qualifying_event,
            finished_at: Utc::now(),
        };
        self.state_tx
            .send_replace(HandleState::Finalized(Box::new(summary)));
    }
}
