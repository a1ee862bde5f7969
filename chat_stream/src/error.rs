use thiserror::Error;

/// A wire frame that could not be turned into an event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed wire event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid audio payload: {0}")]
    Audio(#[from] base64::DecodeError),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("expected an event stream, got content type {0:?}")]
    ContentType(String),
}
