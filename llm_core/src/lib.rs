//! Streaming text generation against upstream LLM providers.
//!
//! Providers expose their output as an ordered stream of text deltas. The
//! [`GenerationAdapter`] adds whole-call retries and cancellation on top.

mod adapter;
mod anthropic;
mod error;
mod openai;
mod provider;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

pub use adapter::{GenerationAdapter, RetryPolicy};
pub use anthropic::AnthropicClient;
pub use error::{LlmError, Result};
pub use openai::OpenAiClient;
pub use provider::{ChatMessage, DeltaStream, GenerationProvider, Role, DEFAULT_SYSTEM_PROMPT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
}

impl LlmProvider {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => LlmProvider::Anthropic,
            _ => LlmProvider::OpenAI,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "gpt-4o-mini",
            LlmProvider::Anthropic => "claude-3-5-haiku-latest",
        }
    }
}

/// Build a provider client, reading its API key from the environment.
pub fn build_provider(
    provider: LlmProvider,
    model: &str,
    base_url: Option<&str>,
    timeout: Duration,
) -> Result<Arc<dyn GenerationProvider>> {
    Ok(match provider {
        LlmProvider::OpenAI => {
            let mut client = OpenAiClient::new(model)?.with_timeout(timeout);
            if let Some(url) = base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        LlmProvider::Anthropic => {
            let mut client = AnthropicClient::new(model)?.with_timeout(timeout);
            if let Some(url) = base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
    })
}
