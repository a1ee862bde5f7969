use thiserror::Error;

use crate::bridge::BridgeState;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("synthesis provider error: {0}")]
    Provider(String),

    #[error("synthesis connection closed unexpectedly: {0}")]
    UnexpectedClose(String),

    #[error("missing API key for synthesis provider: set {0}")]
    MissingApiKey(&'static str),

    #[error("invalid synthesis bridge transition {from:?} -> {to:?}")]
    InvalidTransition { from: BridgeState, to: BridgeState },

    #[error("failed to encode synthesis frame: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SynthesisError>;
