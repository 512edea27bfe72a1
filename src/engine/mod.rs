//! Engine session API: run liveness, durable history, and run start.

pub mod http;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;

use crate::config::RunlinkConfig;
use crate::error::{Result, RunlinkError};
use crate::types::session::ActiveRunEnvelope;
use crate::types::{HistoryMessage, RunActivity};

/// Session and run management calls the controller and reconciler depend on.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Whether the session has a run in flight, and which one.
    async fn query_run_active(&self, session_id: &str) -> Result<RunActivity>;

    /// Durable message history for the session, oldest first.
    async fn fetch_session_history(&self, session_id: &str) -> Result<Vec<HistoryMessage>>;

    /// Start a run from a text prompt and return its run id.
    async fn start_run(&self, session_id: &str, prompt: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct StartedRun {
    #[serde(rename = "runID")]
    run_id: String,
}

/// reqwest-backed [`SessionApi`] for a running engine.
#[derive(Debug, Clone)]
pub struct EngineClient {
    http: reqwest::Client,
    base_url: Url,
    headers: HeaderMap,
    client_id: String,
}

impl EngineClient {
    pub fn new(config: &RunlinkConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            RunlinkError::Configuration(format!("invalid base_url {}: {e}", config.base_url))
        })?;
        let client_id = uuid::Uuid::new_v4().to_string();
        Ok(Self {
            http: http::api_client(config.request_timeout)?,
            headers: http::engine_headers(config.api_token.as_deref(), &client_id),
            base_url,
            client_id,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Id this client identifies itself with on every request.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                RunlinkError::Configuration(format!("base_url {} cannot be a base", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        session_id: &str,
        segments: &[&str],
    ) -> Result<T> {
        let url = self.endpoint(segments)?;
        let resp = self
            .http
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if !(200..300).contains(&status) {
            return Err(http::status_to_error(status, &body, session_id));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl SessionApi for EngineClient {
    async fn query_run_active(&self, session_id: &str) -> Result<RunActivity> {
        let envelope: ActiveRunEnvelope = self
            .get_json(session_id, &["session", session_id, "run"])
            .await?;
        Ok(match envelope.active {
            Some(run) => RunActivity::running(run.run_id),
            None => RunActivity::idle(),
        })
    }

    async fn fetch_session_history(&self, session_id: &str) -> Result<Vec<HistoryMessage>> {
        self.get_json(session_id, &["session", session_id, "message"])
            .await
    }

    async fn start_run(&self, session_id: &str, prompt: &str) -> Result<String> {
        let mut url = self.endpoint(&["session", session_id, "prompt_async"])?;
        url.query_pairs_mut().append_pair("return", "run");
        let body = json!({ "parts": [{ "type": "text", "text": prompt }] });

        let resp = self
            .http
            .post(url)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        if !(200..300).contains(&status) {
            return Err(http::status_to_error(status, &text, session_id));
        }
        let started: StartedRun = serde_json::from_str(&text)?;
        tracing::debug!(session_id, run_id = %started.run_id, "run started");
        Ok(started.run_id)
    }
}
