//! Conversation persistence behind a narrow async interface.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use llm_core::ChatMessage;
use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub sender: Sender,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    fn to_chat_message(&self) -> ChatMessage {
        match self.sender {
            Sender::User => ChatMessage::user(self.content.clone()),
            Sender::Assistant => ChatMessage::assistant(self.content.clone()),
        }
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        content: &str,
    ) -> anyhow::Result<()>;

    /// Prior turns, oldest first, used as generation context.
    async fn history(&self, conversation_id: &str) -> anyhow::Result<Vec<ChatMessage>>;
}

/// In-process store keeping the most recent turns of each conversation.
#[derive(Debug)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<String, Vec<StoredMessage>>>,
    max_history: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(20)
    }
}

impl MemoryStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_history,
        }
    }

    pub async fn messages(&self, conversation_id: &str) -> Vec<StoredMessage> {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn save_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        content: &str,
    ) -> anyhow::Result<()> {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(StoredMessage {
                sender,
                content: content.to_string(),
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn history(&self, conversation_id: &str) -> anyhow::Result<Vec<ChatMessage>> {
        let conversations = self.conversations.read().await;
        let Some(messages) = conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let skip = messages.len().saturating_sub(self.max_history);
        Ok(messages[skip..].iter().map(StoredMessage::to_chat_message).collect())
    }
}
