//! Wire events carried on the chat event stream, one `data: <json>` frame
//! per event.

use base64::{engine::general_purpose, Engine as _};
use llm_core::sse::{SseDecoder, SseEvent};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Text,
    Voice,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Text => "text",
            Mode::Voice => "voice",
        }
    }
}

/// Timed caption for a spoken word, offsets in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtitle {
    pub text: String,
    #[serde(rename = "startTime")]
    pub start_time: u64,
    #[serde(rename = "endTime")]
    pub end_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    Chunk { text: String },
    /// Base64-encoded audio bytes.
    Audio { chunk: String },
    Subtitle { subtitle: Subtitle },
    Error { message: String },
    End,
}

impl WireEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        WireEvent::Chunk { text: text.into() }
    }

    pub fn audio(bytes: &[u8]) -> Self {
        WireEvent::Audio {
            chunk: general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WireEvent::Error { message: message.into() }
    }

    /// `end` and `error` close the stream; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WireEvent::End | WireEvent::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WireEvent::Chunk { .. } => "chunk",
            WireEvent::Audio { .. } => "audio",
            WireEvent::Subtitle { .. } => "subtitle",
            WireEvent::Error { .. } => "error",
            WireEvent::End => "end",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decoded audio bytes for `audio` events.
    pub fn audio_bytes(&self) -> Option<Result<Vec<u8>, DecodeError>> {
        match self {
            WireEvent::Audio { chunk } => {
                Some(general_purpose::STANDARD.decode(chunk).map_err(DecodeError::from))
            }
            _ => None,
        }
    }
}

/// Incremental decoder for the event stream body. Frames may be split across
/// network chunks; comment lines (keep-alives) are ignored.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    sse: SseDecoder,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<WireEvent, DecodeError>> {
        self.sse.push(chunk).into_iter().map(decode).collect()
    }

    pub fn finish(&mut self) -> Option<Result<WireEvent, DecodeError>> {
        self.sse.finish().map(decode)
    }
}

fn decode(event: SseEvent) -> Result<WireEvent, DecodeError> {
    Ok(serde_json::from_str(&event.data)?)
}
