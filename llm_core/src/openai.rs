use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{LlmError, Result};
use crate::provider::{
    conversation, ChatMessage, DeltaStream, GenerationProvider, DEFAULT_SYSTEM_PROMPT,
};
use crate::sse::{delta_stream, Parsed, SseEvent};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Structure for the OpenAI Chat API request
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u16,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Structure for the OpenAI Chat API response
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Client for OpenAI-compatible chat-completion endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    client: Client,
    model: String,
    base_url: String,
    max_tokens: u16,
    timeout: Duration,
}

impl OpenAiClient {
    /// Create a new client. Reads API key from the `OPENAI_API_KEY` env variable.
    pub fn new(model: &str) -> Result<Self> {
        let api_key =
            std::env::var("OPENAI_API_KEY").map_err(|_| LlmError::MissingApiKey("OPENAI_API_KEY"))?;
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

    /// Point the client at a gateway or self-hosted server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Timeout for establishing the call, also applied to silence between
    /// body chunks once streaming.
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
        let url = format!("{}/chat/completions", self.base_url);
        let mut messages = vec![Message { role: "system", content: DEFAULT_SYSTEM_PROMPT }];
        messages.extend(
            conversation(prompt, history)
                .into_iter()
                .map(|(role, content)| Message { role, content }),
        );
        let req_body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            stream,
        };

        let request = self.client.post(url).bearer_auth(&self.api_key).json(&req_body).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }
        debug!(model = %self.model, stream, "openai call established");
        Ok(response)
    }
}

#[async_trait]
impl GenerationProvider for OpenAiClient {
    async fn stream_generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<DeltaStream> {
        let response = self.send(prompt, history, true).await?;
        Ok(delta_stream(response, "openai", self.timeout, classify_event))
    }

    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String> {
        let response = self
            .send(prompt, history, false)
            .await?
            .json::<ChatResponse>()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Malformed("response contained no choices".into()))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Classify one chat-completion chunk. Role-only and finish chunks carry no
/// text and are skipped.
pub(crate) fn classify_event(event: &SseEvent) -> Parsed {
    let data = event.data.trim();
    if data == "[DONE]" {
        return Parsed::Done;
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "skipping malformed openai stream payload");
            return Parsed::Skip;
        }
    };

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown provider error");
        return Parsed::Failed(message.to_string());
    }

    match value
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
    {
        Some(text) if !text.is_empty() => Parsed::Delta(text.to_string()),
        _ => Parsed::Skip,
    }
}
