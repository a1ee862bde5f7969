//! Sentence segmentation and streaming speech synthesis.
//!
//! Generated text is cut into speakable units by [`SentenceBuffer`], then
//! pushed through a [`SynthesisBridge`] that owns one provider connection per
//! reply and yields audio and word timings in order.

mod alignment;
pub mod bridge;
mod error;
mod provider;
pub mod segment;
mod text;
mod ws;

pub use alignment::Alignment;
pub use bridge::{AudioFrame, BridgeOutput, BridgeState, SynthesisBridge};
pub use error::{Result, SynthesisError};
pub use provider::{
    FrameStream, SynthesisFrame, SynthesisProvider, SynthesisSink, VoiceSettings, WordTiming,
};
pub use segment::{PunctuationSegmenter, Segmenter, SentenceBuffer};
pub use text::clean_for_speech;
pub use ws::{WebSocketSynthesizer, DEFAULT_WS_URL};
