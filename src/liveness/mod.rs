//! Liveness supervisor: decides when a silent run should be finalized.
//!
//! Owns the watchdog, the periodic liveness poll, the idle timer, and at most
//! one in-flight liveness query. Everything is driven through
//! [`LivenessSupervisor::poll_verdict`], which is cancel-safe, so the stream
//! driver can race it against the event channel in a `tokio::select!` loop.

use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};

use crate::engine::SessionApi;
use crate::error::Result;
use crate::types::{RunActivity, RunOutcome};
use crate::util::timeout::with_timeout;

/// Timer settings for one attached run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessSettings {
    /// How long to wait for the first qualifying event.
    pub watchdog_grace: Duration,
    pub poll_interval: Duration,
    /// Silence after the last qualifying event that counts as a timeout.
    pub idle_timeout: Option<Duration>,
    pub query_timeout: Duration,
}

/// Longest timer the supervisor arms; longer settings are clamped to it so
/// deadline arithmetic cannot overflow. Matches tokio's own far-future cap.
const MAX_TIMER: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Something the driver has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessVerdict {
    Finalize(RunOutcome),
    /// The watchdog fired but the engine says the run is still going.
    WaitingForDeltas,
    /// The engine refused the liveness query with a non-transient error.
    /// Reported once; polling continues and only an affirmative "inactive"
    /// answer finalizes.
    QueryRejected(String),
}

/// Snapshot of what the supervisor knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessState {
    pub last_event_at: Option<Instant>,
    pub saw_qualifying_event: bool,
    pub waiting_for_deltas: bool,
    pub watchdog_deadline: Option<Instant>,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum QueryReason {
    Poll,
    Watchdog,
    EndOfStream,
}

type ActivityFuture = Pin<Box<dyn Future<Output = Result<RunActivity>> + Send>>;

struct PendingQuery {
    reason: QueryReason,
    future: ActivityFuture,
}

pub struct LivenessSupervisor {
    api: Arc<dyn SessionApi>,
    session_id: String,
    run_id: String,
    settings: LivenessSettings,
    state: LivenessState,
    watchdog: Option<Pin<Box<Sleep>>>,
    poll: Interval,
    idle: Option<Pin<Box<Sleep>>>,
    query: Option<PendingQuery>,
    rejection_reported: bool,
}

impl LivenessSupervisor {
    /// Arm the watchdog and schedule the first poll one interval from now.
    /// Must be called inside a tokio runtime.
    pub fn new(
        api: Arc<dyn SessionApi>,
        session_id: impl Into<String>,
        run_id: impl Into<String>,
        settings: LivenessSettings,
    ) -> Self {
        let settings = LivenessSettings {
            watchdog_grace: settings.watchdog_grace.min(MAX_TIMER),
            poll_interval: settings.poll_interval.min(MAX_TIMER),
            idle_timeout: settings.idle_timeout.map(|limit| limit.min(MAX_TIMER)),
            query_timeout: settings.query_timeout.min(MAX_TIMER),
        };
        let now = Instant::now();
        let deadline = now + settings.watchdog_grace;
        let mut poll = tokio::time::interval_at(now + settings.poll_interval, settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            api,
            session_id: session_id.into(),
            run_id: run_id.into(),
            settings,
            state: LivenessState {
                last_event_at: None,
                saw_qualifying_event: false,
                waiting_for_deltas: false,
                watchdog_deadline: Some(deadline),
                poll_interval: settings.poll_interval,
            },
            watchdog: Some(Box::pin(tokio::time::sleep_until(deadline))),
            poll,
            idle: None,
            query: None,
            rejection_reported: false,
        }
    }

    pub fn state(&self) -> &LivenessState {
        &self.state
    }

    /// A qualifying event arrived: cancel the watchdog and restart the idle timer.
    pub fn record_event(&mut self) {
        let now = Instant::now();
        self.watchdog = None;
        self.state.watchdog_deadline = None;
        self.state.saw_qualifying_event = true;
        self.state.waiting_for_deltas = false;
        self.state.last_event_at = Some(now);

        if let Some(limit) = self.settings.idle_timeout {
            match self.idle.as_mut() {
                Some(sleep) => sleep.as_mut().reset(now + limit),
                None => self.idle = Some(Box::pin(tokio::time::sleep_until(now + limit))),
            }
        }
    }

    /// The channel ended without a terminal event: ask the engine once more.
    /// The next verdict is always a finalize.
    pub fn check_after_end_of_stream(&mut self) {
        self.start_query(QueryReason::EndOfStream);
    }

    /// Drop every timer and any in-flight query.
    pub fn disarm(&mut self) {
        self.watchdog = None;
        self.idle = None;
        self.query = None;
        self.state.watchdog_deadline = None;
    }

    /// Wait for the next verdict.
    pub async fn next_verdict(&mut self) -> LivenessVerdict {
        poll_fn(|cx| self.poll_verdict(cx)).await
    }

    pub fn poll_verdict(&mut self, cx: &mut Context<'_>) -> Poll<LivenessVerdict> {
        loop {
            if let Some(pending) = self.query.as_mut() {
                if let Poll::Ready(result) = pending.future.as_mut().poll(cx) {
                    let reason = pending.reason;
                    self.query = None;
                    if let Some(verdict) = self.on_query_result(reason, result) {
                        return Poll::Ready(verdict);
                    }
                    continue;
                }
            }

            if let Some(sleep) = self.watchdog.as_mut() {
                if sleep.as_mut().poll(cx).is_ready() {
                    self.watchdog = None;
                    self.state.watchdog_deadline = None;
                    if !self.state.saw_qualifying_event {
                        tracing::debug!(
                            session_id = %self.session_id,
                            run_id = %self.run_id,
                            "no run events within grace period, checking liveness"
                        );
                        self.start_query(QueryReason::Watchdog);
                    }
                    continue;
                }
            }

            if let Some(sleep) = self.idle.as_mut() {
                if sleep.as_mut().poll(cx).is_ready() {
                    self.idle = None;
                    tracing::debug!(
                        session_id = %self.session_id,
                        run_id = %self.run_id,
                        "run idle timeout elapsed"
                    );
                    return Poll::Ready(LivenessVerdict::Finalize(RunOutcome::Timeout));
                }
            }

            if self.poll.poll_tick(cx).is_ready() {
                // One query at a time; a tick during a slow query is skipped.
                if self.query.is_none() {
                    self.start_query(QueryReason::Poll);
                    continue;
                }
            }

            return Poll::Pending;
        }
    }

    fn start_query(&mut self, reason: QueryReason) {
        if let Some(pending) = self.query.as_mut() {
            pending.reason = pending.reason.max(reason);
            return;
        }
        let api = Arc::clone(&self.api);
        let session_id = self.session_id.clone();
        let limit = self.settings.query_timeout;
        self.query = Some(PendingQuery {
            reason,
            future: Box::pin(async move {
                with_timeout(limit, api.query_run_active(&session_id)).await
            }),
        });
    }

    fn on_query_result(
        &mut self,
        reason: QueryReason,
        result: Result<RunActivity>,
    ) -> Option<LivenessVerdict> {
        match result {
            Ok(activity) if !activity.is_run_active(&self.run_id) => {
                Some(LivenessVerdict::Finalize(self.inactive_outcome()))
            }
            Ok(_) => match reason {
                QueryReason::EndOfStream => {
                    Some(LivenessVerdict::Finalize(RunOutcome::StreamError))
                }
                QueryReason::Watchdog if !self.state.saw_qualifying_event => {
                    self.state.waiting_for_deltas = true;
                    Some(LivenessVerdict::WaitingForDeltas)
                }
                _ => None,
            },
            Err(err) if reason == QueryReason::EndOfStream => {
                tracing::warn!(
                    session_id = %self.session_id,
                    run_id = %self.run_id,
                    error = %err,
                    "liveness query failed after stream end"
                );
                Some(LivenessVerdict::Finalize(RunOutcome::StreamError))
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    session_id = %self.session_id,
                    run_id = %self.run_id,
                    error = %err,
                    ?reason,
                    "liveness query failed"
                );
                None
            }
            Err(err) => {
                tracing::error!(
                    session_id = %self.session_id,
                    run_id = %self.run_id,
                    error = %err,
                    ?reason,
                    "liveness query rejected"
                );
                if self.rejection_reported {
                    return None;
                }
                self.rejection_reported = true;
                Some(LivenessVerdict::QueryRejected(err.to_string()))
            }
        }
    }

    fn inactive_outcome(&self) -> RunOutcome {
        if self.state.saw_qualifying_event {
            RunOutcome::Inactive
        } else {
            RunOutcome::InactiveNoEvents
        }
    }
}

impl std::fmt::Debug for LivenessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessSupervisor")
            .field("session_id", &self.session_id)
            .field("run_id", &self.run_id)
            .field("state", &self.state)
            .field("query_in_flight", &self.query.is_some())
            .finish()
    }
}
