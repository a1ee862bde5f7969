use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Word-level timing, offsets in milliseconds from the start of the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordTiming {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// One frame received from the synthesis provider.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisFrame {
    Audio(Vec<u8>),
    /// Word timings relative to the start of the audio chunk they came with.
    Timing(Vec<WordTiming>),
    /// Provider acknowledged end-of-input and flushed all audio.
    Final,
}

pub type FrameStream = BoxStream<'static, Result<SynthesisFrame>>;

/// Voice parameters sent with the initialization frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
    pub speed: Option<f32>,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            model_id: "eleven_turbo_v2_5".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
            speed: None,
        }
    }
}

/// Write half of a synthesis connection.
#[async_trait]
pub trait SynthesisSink: Send {
    /// Send one sentence for synthesis.
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Tell the provider no more text follows so it flushes pending audio.
    async fn end_input(&mut self) -> Result<()>;
}

/// Upstream speech-synthesis provider with a bidirectional connection.
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    /// Open a connection and send the initialization frame.
    async fn connect(&self, wants_timing: bool) -> Result<(Box<dyn SynthesisSink>, FrameStream)>;

    fn name(&self) -> &'static str;
}
