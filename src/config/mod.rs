//! Configuration system (layered: defaults < config file < env < code).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, RunlinkError};

/// Global default config (lazy-initialized from env).
static DEFAULT_CONFIG: OnceLock<RunlinkConfig> = OnceLock::new();

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:39731";

/// Connection and liveness settings shared by every attached run.
#[derive(Clone, PartialEq)]
pub struct RunlinkConfig {
    /// Engine base URL, without a trailing slash.
    pub base_url: String,
    /// Token sent as `x-tandem-token` when set.
    pub api_token: Option<String>,
    /// How long a fresh attach may stay silent before the watchdog asks the
    /// engine whether the run is still alive.
    pub watchdog_grace: Duration,
    /// Period of the background liveness poll.
    pub poll_interval: Duration,
    /// Silence after the last qualifying event that ends the run as `timeout`.
    pub idle_timeout: Option<Duration>,
    /// Upper bound for a single liveness query.
    pub liveness_query_timeout: Duration,
    /// Consecutive undecodable messages tolerated before `stream_error`.
    pub max_decode_failures: u32,
    /// Timeout for plain request/response calls to the engine.
    pub request_timeout: Duration,
}

impl fmt::Debug for RunlinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunlinkConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| ".."))
            .field("watchdog_grace", &self.watchdog_grace)
            .field("poll_interval", &self.poll_interval)
            .field("idle_timeout", &self.idle_timeout)
            .field("liveness_query_timeout", &self.liveness_query_timeout)
            .field("max_decode_failures", &self.max_decode_failures)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for RunlinkConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    base_url: Option<String>,
    api_token: Option<String>,
    watchdog_grace_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    idle_timeout_ms: Option<u64>,
    liveness_query_timeout_ms: Option<u64>,
    max_decode_failures: Option<u32>,
    request_timeout_ms: Option<u64>,
}

impl RunlinkConfig {
    /// Built-in defaults.
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            watchdog_grace: Duration::from_secs(4),
            poll_interval: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
            liveness_query_timeout: Duration::from_secs(10),
            max_decode_failures: 3,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_watchdog_grace(mut self, grace: Duration) -> Self {
        self.watchdog_grace = grace;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Load every layer: defaults, then `~/.runlink/config.toml` if present,
    /// then environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`RunlinkConfig::load`], reading `path` instead of the default
    /// file. An explicit path must exist.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::new();
        match path {
            Some(path) => config = config.merge_file(path)?,
            None => {
                if let Some(path) = default_config_path().filter(|p| p.exists()) {
                    config = config.merge_file(&path)?;
                }
            }
        }
        Ok(config.merge_env())
    }

    /// Defaults overlaid with environment variables (and `.env`, if present).
    pub fn from_env() -> Self {
        Self::new().merge_env()
    }

    /// Get (or create) the global default config.
    pub fn global() -> &'static RunlinkConfig {
        DEFAULT_CONFIG.get_or_init(Self::from_env)
    }

    /// Overlay the keys present in a TOML file.
    pub fn merge_file(mut self, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&raw).map_err(|e| {
            RunlinkError::Configuration(format!("{}: {e}", path.display()))
        })?;

        if let Some(url) = file.base_url {
            self = self.with_base_url(url);
        }
        if let Some(token) = file.api_token {
            self.api_token = Some(token);
        }
        if let Some(ms) = file.watchdog_grace_ms {
            self.watchdog_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = file.poll_interval_ms {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.idle_timeout_ms {
            self.idle_timeout = millis_or_disabled(ms);
        }
        if let Some(ms) = file.liveness_query_timeout_ms {
            self.liveness_query_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = file.max_decode_failures {
            self.max_decode_failures = n;
        }
        if let Some(ms) = file.request_timeout_ms {
            self.request_timeout = Duration::from_millis(ms);
        }
        self.validate()?;
        Ok(self)
    }

    fn merge_env(mut self) -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        if let Ok(url) = std::env::var("RUNLINK_BASE_URL") {
            self = self.with_base_url(url);
        }
        if let Ok(token) = std::env::var("RUNLINK_API_TOKEN") {
            if !token.trim().is_empty() {
                self.api_token = Some(token);
            }
        }
        if let Some(ms) = env_millis("RUNLINK_WATCHDOG_MS") {
            self.watchdog_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("RUNLINK_POLL_INTERVAL_MS") {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("RUNLINK_IDLE_TIMEOUT_MS") {
            self.idle_timeout = millis_or_disabled(ms);
        }
        self
    }

    /// Reject settings that would make the liveness machinery spin.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(RunlinkError::Configuration(
                "poll_interval must be greater than zero".into(),
            ));
        }
        if self.max_decode_failures == 0 {
            return Err(RunlinkError::Configuration(
                "max_decode_failures must be at least 1".into(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(RunlinkError::Configuration(format!(
                "base_url must be an http(s) URL, got {}",
                self.base_url
            )));
        }
        Ok(())
    }
}

/// `~/.runlink/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    directories::UserDirs::new().map(|dirs| dirs.home_dir().join(".runlink").join("config.toml"))
}

fn env_millis(var: &str) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(ms),
        Err(_) => {
            tracing::warn!(var, value = %raw, "ignoring non-numeric duration override");
            None
        }
    }
}

fn millis_or_disabled(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
