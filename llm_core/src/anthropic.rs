use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{LlmError, Result};
use crate::provider::{
    conversation, ChatMessage, DeltaStream, GenerationProvider, DEFAULT_SYSTEM_PROMPT,
};
use crate::sse::{delta_stream, Parsed, SseEvent};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Client for the Anthropic messages API.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    api_key: String,
    client: Client,
    model: String,
    base_url: String,
    max_tokens: u32,
    timeout: Duration,
}

impl AnthropicClient {
    /// Reads the API key from `ANTHROPIC_API_KEY`.
    pub fn new(model: &str) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| LlmError::MissingApiKey("ANTHROPIC_API_KEY"))?;
        Ok(Self::with_api_key(model, api_key))
    }

    pub fn with_api_key(model: &str, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: Client::new(),
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: 400,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn send(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/messages", self.base_url);
        let body = MessagesRequest {
            model: &self.model,
            system: DEFAULT_SYSTEM_PROMPT,
            messages: conversation(prompt, history)
                .into_iter()
                .map(|(role, content)| Message { role, content })
                .collect(),
            max_tokens: self.max_tokens,
            stream,
        };

        let request = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }
        debug!(model = %self.model, stream, "anthropic call established");
        Ok(response)
    }
}

#[async_trait]
impl GenerationProvider for AnthropicClient {
    async fn stream_generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<DeltaStream> {
        let response = self.send(prompt, history, true).await?;
        Ok(delta_stream(response, "anthropic", self.timeout, classify_event))
    }

    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String> {
        let value: Value = self.send(prompt, history, false).await?.json().await?;

        let blocks = value
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| LlmError::Malformed("response has no content blocks".into()))?;

        Ok(blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect())
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

/// Only `content_block_delta` events with a `text_delta` carry text; the
/// block start/stop, message start/delta and ping wrappers are discarded.
pub(crate) fn classify_event(event: &SseEvent) -> Parsed {
    let value: Value = match serde_json::from_str(&event.data) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "skipping malformed anthropic stream payload");
            return Parsed::Skip;
        }
    };

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .or(event.event.as_deref())
        .unwrap_or("");

    match kind {
        "content_block_delta" => match value.pointer("/delta/type").and_then(|t| t.as_str()) {
            Some("text_delta") => match value.pointer("/delta/text").and_then(|t| t.as_str()) {
                Some(text) if !text.is_empty() => Parsed::Delta(text.to_string()),
                _ => Parsed::Skip,
            },
            _ => Parsed::Skip,
        },
        "message_stop" => Parsed::Done,
        "error" => {
            let message = value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown provider error");
            Parsed::Failed(message.to_string())
        }
        _ => Parsed::Skip,
    }
}
