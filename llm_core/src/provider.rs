use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Ordered text deltas; the stream ending means the generation completed.
pub type DeltaStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of conversation history handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Upstream text-generation provider.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Start a streaming generation. Errors returned here happen before any
    /// delta was produced; errors inside the stream are mid-stream failures.
    async fn stream_generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<DeltaStream>;

    /// Non-streaming generation returning the complete reply.
    async fn generate(&self, prompt: &str, history: &[ChatMessage]) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// Default system prompt for the support assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful support assistant. \
Answer in plain conversational sentences without markdown, since replies may be read aloud.";

/// Flatten history and the new prompt into role/content pairs.
pub(crate) fn conversation<'a>(
    prompt: &'a str,
    history: &'a [ChatMessage],
) -> Vec<(&'static str, &'a str)> {
    let mut messages: Vec<(&'static str, &'a str)> = history
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| (m.role.as_str(), m.content.as_str()))
        .collect();
    messages.push((Role::User.as_str(), prompt));
    messages
}
