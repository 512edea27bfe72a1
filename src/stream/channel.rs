//! Event channel seam: the SSE transport plus an in-memory channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Url;
use reqwest_eventsource::{retry, Event, EventSource};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::RunlinkConfig;
use crate::engine::http;
use crate::error::{Result, RunlinkError};

/// A source of raw stream messages for one run.
#[async_trait]
pub trait EventChannel: Send {
    /// Next raw `data` payload. `Ok(None)` is a clean end of stream.
    ///
    /// Must be cancel-safe: the driver races it against timers.
    async fn next_message(&mut self) -> Result<Option<String>>;

    /// Release the underlying transport. Called once by the driver.
    fn close(&mut self);
}

/// Opens an [`EventChannel`] for a (session, run) pair.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, session_id: &str, run_id: &str) -> Result<Box<dyn EventChannel>>;
}

/// Connects to the engine's run-filtered SSE endpoint.
#[derive(Debug, Clone)]
pub struct SseConnector {
    http: reqwest::Client,
    base_url: Url,
    headers: HeaderMap,
}

impl SseConnector {
    pub fn new(config: &RunlinkConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            RunlinkError::Configuration(format!("invalid base_url {}: {e}", config.base_url))
        })?;
        let client_id = uuid::Uuid::new_v4().to_string();
        let mut headers = http::engine_headers(config.api_token.as_deref(), &client_id);
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        Ok(Self {
            http: http::stream_client(Duration::from_secs(10))?,
            base_url,
            headers,
        })
    }

    fn event_url(&self, session_id: &str, run_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                RunlinkError::Configuration(format!("base_url {} cannot be a base", self.base_url))
            })?
            .pop_if_empty()
            .push("event");
        url.query_pairs_mut()
            .append_pair("sessionID", session_id)
            .append_pair("runID", run_id);
        Ok(url)
    }
}

#[async_trait]
impl ChannelConnector for SseConnector {
    async fn connect(&self, session_id: &str, run_id: &str) -> Result<Box<dyn EventChannel>> {
        let url = self.event_url(session_id, run_id)?;
        let request = self.http.get(url).headers(self.headers.clone());
        let mut source = EventSource::new(request)
            .map_err(|e| RunlinkError::Stream(format!("cannot open event stream: {e}")))?;
        // Transport failures end the run; reconnecting is the consumer's call.
        source.set_retry_policy(Box::new(retry::Never));

        let mut pending = None;
        match source.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(msg))) => pending = Some(msg.data),
            Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, resp))) => {
                source.close();
                let body = resp.text().await.unwrap_or_default();
                return Err(http::status_to_error(status.as_u16(), &body, session_id));
            }
            Some(Err(err)) => {
                source.close();
                return Err(RunlinkError::Stream(err.to_string()));
            }
            None => return Err(RunlinkError::Stream("event stream closed before open".into())),
        }

        tracing::debug!(session_id, run_id, "event stream open");
        Ok(Box::new(SseChannel { source, pending }))
    }
}

struct SseChannel {
    source: EventSource,
    pending: Option<String>,
}

#[async_trait]
impl EventChannel for SseChannel {
    async fn next_message(&mut self) -> Result<Option<String>> {
        if let Some(data) = self.pending.take() {
            return Ok(Some(data));
        }
        loop {
            match self.source.next().await {
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(msg))) => return Ok(Some(msg.data)),
                Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => return Ok(None),
                Some(Err(err)) => return Err(RunlinkError::Stream(err.to_string())),
            }
        }
    }

    fn close(&mut self) {
        self.source.close();
    }
}

/// Item carried by the in-memory channel.
type Frame = std::result::Result<String, String>;

/// Producer half of an in-memory channel, for consumers that relay events
/// from a transport of their own.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Frame>,
    closes: Arc<AtomicUsize>,
}

impl ChannelSender {
    /// Queue one raw message. Returns `false` once the receiver is gone.
    pub fn send(&self, raw: impl Into<String>) -> bool {
        self.tx.send(Ok(raw.into())).is_ok()
    }

    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send(value.to_string())
    }

    /// Inject a transport failure.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.tx.send(Err(message.into())).is_ok()
    }

    /// How many times the receiving side was closed.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Consumer half of an in-memory channel. The stream ends when every
/// [`ChannelSender`] is dropped.
#[derive(Debug)]
pub struct StreamChannel {
    rx: UnboundedReceiverStream<Frame>,
    closes: Arc<AtomicUsize>,
}

/// Create a connected in-memory channel.
pub fn pair() -> (ChannelSender, StreamChannel) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));
    (
        ChannelSender {
            tx,
            closes: Arc::clone(&closes),
        },
        StreamChannel {
            rx: UnboundedReceiverStream::new(rx),
            closes,
        },
    )
}

#[async_trait]
impl EventChannel for StreamChannel {
    async fn next_message(&mut self) -> Result<Option<String>> {
        match self.rx.next().await {
            Some(Ok(raw)) => Ok(Some(raw)),
            Some(Err(message)) => Err(RunlinkError::Stream(message)),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.rx.close();
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
