use std::time::Duration;

use thiserror::Error;

/// Errors raised by generation providers and the adapter around them.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Error reported by the provider after the stream had started.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("missing API key: set {0}")]
    MissingApiKey(&'static str),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl LlmError {
    /// Whether the whole generation call may be attempted again.
    ///
    /// Only failures that happen before any delta was produced qualify:
    /// timeouts, connection failures, rate limiting and upstream 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout(_) => true,
            LlmError::Transport(e) => e.is_timeout() || e.is_connect(),
            LlmError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
