//! WebSocket synthesis provider speaking the ElevenLabs `stream-input`
//! protocol: one init frame, one frame per text segment, an empty text frame
//! as end-of-input, and JSON audio/alignment messages back.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::alignment::Alignment;
use crate::error::{Result, SynthesisError};
use crate::provider::{FrameStream, SynthesisFrame, SynthesisProvider, SynthesisSink, VoiceSettings};

pub const DEFAULT_WS_URL: &str = "wss://api.elevenlabs.io";

const OUTPUT_FORMAT: &str = "mp3_44100_128";
const EOS_JSON: &str = r#"{"text":""}"#;

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Serialize)]
struct InitFrame<'a> {
    text: &'static str,
    voice_settings: InitVoiceSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    xi_api_key: Option<&'a str>,
}

#[derive(Serialize)]
struct InitVoiceSettings {
    stability: f32,
    similarity_boost: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
}

#[derive(Serialize)]
struct TextFrame {
    text: String,
    try_trigger_generation: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderMessage {
    audio: Option<String>,
    is_final: Option<bool>,
    alignment: Option<Alignment>,
    normalized_alignment: Option<Alignment>,
    error: Option<String>,
    message: Option<String>,
}

/// Synthesis over a provider WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketSynthesizer {
    base_url: String,
    api_key: Option<String>,
    voice: VoiceSettings,
}

impl WebSocketSynthesizer {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, voice: VoiceSettings) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            voice,
        }
    }

    fn endpoint(&self, wants_timing: bool) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream-input?model_id={}&output_format={}\
             &sync_alignment={}",
            self.base_url, self.voice.voice_id, self.voice.model_id, OUTPUT_FORMAT, wants_timing
        )
    }

    fn init_frame(&self) -> Result<String> {
        let frame = InitFrame {
            text: " ",
            voice_settings: InitVoiceSettings {
                stability: self.voice.stability,
                similarity_boost: self.voice.similarity_boost,
                speed: self.voice.speed,
            },
            xi_api_key: self.api_key.as_deref(),
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

#[async_trait]
impl SynthesisProvider for WebSocketSynthesizer {
    async fn connect(&self, wants_timing: bool) -> Result<(Box<dyn SynthesisSink>, FrameStream)> {
        if self.api_key.is_none() && self.base_url.starts_with("wss://") {
            return Err(SynthesisError::MissingApiKey("TTS_API_KEY"));
        }

        let (ws_stream, _) = connect_async(self.endpoint(wants_timing)).await?;
        let (mut writer, mut reader) = ws_stream.split();
        writer.send(Message::Text(self.init_frame()?)).await?;
        info!(voice = %self.voice.voice_id, wants_timing, "synthesis connection open");

        let frames = async_stream::stream! {
            while let Some(msg) = reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match decode_message(&text, wants_timing) {
                        Ok(frames) => {
                            for frame in frames {
                                yield Ok(frame);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    },
                    Ok(Message::Binary(data)) => yield Ok(SynthesisFrame::Audio(data)),
                    Ok(Message::Close(frame)) => {
                        if let Some(frame) = frame {
                            if frame.code != CloseCode::Normal {
                                let reason = frame.reason.to_string();
                                yield Err(SynthesisError::UnexpectedClose(reason));
                            }
                        }
                        debug!("synthesis connection closed by provider");
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(SynthesisError::WebSocket(e));
                        return;
                    }
                }
            }
        };

        Ok((Box::new(WsSink { writer }), Box::pin(frames)))
    }

    fn name(&self) -> &'static str {
        "elevenlabs-ws"
    }
}

struct WsSink {
    writer: WsWriter,
}

#[async_trait]
impl SynthesisSink for WsSink {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        // The provider expects each segment to end with a space.
        let frame = TextFrame {
            text: format!("{text} "),
            try_trigger_generation: true,
        };
        self.writer.send(Message::Text(serde_json::to_string(&frame)?)).await?;
        Ok(())
    }

    async fn end_input(&mut self) -> Result<()> {
        self.writer.send(Message::Text(EOS_JSON.to_string())).await?;
        Ok(())
    }
}

/// Decode one provider text message. Malformed payloads are skipped.
fn decode_message(text: &str, wants_timing: bool) -> Result<Vec<SynthesisFrame>> {
    let msg: ProviderMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "skipping malformed synthesis frame");
            return Ok(Vec::new());
        }
    };

    if let Some(error) = msg.error {
        let detail = msg.message.unwrap_or(error);
        return Err(SynthesisError::Provider(detail));
    }

    let mut frames = Vec::new();
    if let Some(audio) = msg.audio.as_deref().filter(|a| !a.is_empty()) {
        match general_purpose::STANDARD.decode(audio) {
            Ok(bytes) => frames.push(SynthesisFrame::Audio(bytes)),
            Err(e) => warn!(error = %e, "skipping audio frame with invalid base64"),
        }
    }
    if wants_timing {
        if let Some(alignment) = msg.normalized_alignment.or(msg.alignment) {
            let words = alignment.words();
            if !words.is_empty() {
                frames.push(SynthesisFrame::Timing(words));
            }
        }
    }
    if msg.is_final == Some(true) {
        frames.push(SynthesisFrame::Final);
    }
    Ok(frames)
}
