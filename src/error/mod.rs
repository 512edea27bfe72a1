//! Error types for runlink.

use thiserror::Error;

/// Primary error type for all runlink operations.
#[derive(Error, Debug)]
pub enum RunlinkError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session {session_id} already has active run {active_run_id}")]
    RunConflict {
        session_id: String,
        active_run_id: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Broad error category used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    Network,
    Timeout,
    Server,
    Api,
    Conflict,
    Configuration,
    Serialization,
    Stream,
    Unknown,
}

impl RunlinkError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) | Self::Decode(_) => ErrorCategory::Serialization,
            Self::RunConflict { .. } => ErrorCategory::Conflict,
            Self::Stream(_) => ErrorCategory::Stream,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is a transient condition (network blip, timeout,
    /// server hiccup) rather than a definitive answer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Server
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, RunlinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_status_classification() {
        assert_eq!(RunlinkError::api(401, "no").category(), ErrorCategory::Authentication);
        assert_eq!(RunlinkError::api(503, "busy").category(), ErrorCategory::Server);
        assert_eq!(RunlinkError::api(422, "bad").category(), ErrorCategory::Api);
    }

    #[test]
    fn transient_errors() {
        assert!(RunlinkError::Timeout(10).is_transient());
        assert!(RunlinkError::api(502, "gateway").is_transient());
        assert!(!RunlinkError::NotFound("s-1".into()).is_transient());
        assert!(!RunlinkError::Decode("junk".into()).is_transient());
    }

    #[test]
    fn conflict_message_names_active_run() {
        let err = RunlinkError::RunConflict {
            session_id: "s-1".into(),
            active_run_id: "r-9".into(),
            retry_after_ms: Some(500),
        };
        assert_eq!(err.to_string(), "Session s-1 already has active run r-9");
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }
}
