use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::wire::{FrameDecoder, Mode, WireEvent};

/// Body of both chat endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub wants_timing: bool,
}

impl StreamRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            message: message.into(),
            mode: Mode::Text,
            wants_timing: false,
        }
    }

    pub fn with_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

/// Reply of the non-streaming endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackResponse {
    pub reply: String,
    pub conversation_id: String,
}

/// Events of an established stream. An `Err` item means the stream broke
/// after it had started.
pub type EventStream = BoxStream<'static, Result<WireEvent, ClientError>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the event stream. Errors here are connection-level.
    async fn open_stream(&self, request: &StreamRequest) -> Result<EventStream, ClientError>;

    /// Single request/response exchange used as fallback.
    async fn fetch_full(&self, request: &StreamRequest) -> Result<FallbackResponse, ClientError>;
}

/// [`Transport`] over HTTP against the chat server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_stream(&self, request: &StreamRequest) -> Result<EventStream, ClientError> {
        let url = format!("{}/chat/stream", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("accept", "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("text/event-stream") {
            return Err(ClientError::ContentType(content_type));
        }
        debug!(url = %url, "event stream established");

        let mut body = resp.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = FrameDecoder::new();
            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ClientError::Transport(e));
                        return;
                    }
                };
                for event in decoder.push(&chunk) {
                    match event {
                        Ok(event) => yield Ok(event),
                        Err(e) => warn!(error = %e, "skipping malformed wire frame"),
                    }
                }
            }
            match decoder.finish() {
                Some(Ok(event)) => yield Ok(event),
                Some(Err(e)) => warn!(error = %e, "skipping malformed trailing frame"),
                None => {}
            }
        };
        Ok(stream.boxed())
    }

    async fn fetch_full(&self, request: &StreamRequest) -> Result<FallbackResponse, ClientError> {
        let resp = self
            .client
            .post(format!("{}/chat", self.base_url))
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        Ok(resp.json().await?)
    }
}
