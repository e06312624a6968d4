//! Chat and message storage.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::MessageRole;
use crate::tools::ToolResponse;

/// A conversation owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: ToolResponse,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub attachments: Vec<Value>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::ToolResult { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Persistence for chats and their messages.
#[async_trait]
pub trait ChatStore: Send + Sync + std::fmt::Debug {
    async fn get_chat(&self, id: &str) -> anyhow::Result<Option<Chat>>;

    async fn save_chat(&self, chat: Chat) -> anyhow::Result<()>;

    /// Remove a chat and its messages, returning the removed chat.
    async fn delete_chat(&self, id: &str) -> anyhow::Result<Option<Chat>>;

    async fn save_messages(&self, messages: Vec<ChatMessage>) -> anyhow::Result<()>;

    /// Messages of a chat in insertion order.
    async fn get_messages(&self, chat_id: &str) -> anyhow::Result<Vec<ChatMessage>>;
}

/// Process-local store; contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryChatStore {
    chats: RwLock<HashMap<String, Chat>>,
    messages: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn get_chat(&self, id: &str) -> anyhow::Result<Option<Chat>> {
        let chats = self.chats.read().unwrap_or_else(PoisonError::into_inner);
        Ok(chats.get(id).cloned())
    }

    async fn save_chat(&self, chat: Chat) -> anyhow::Result<()> {
        self.chats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chat.id.clone(), chat);
        Ok(())
    }

    async fn delete_chat(&self, id: &str) -> anyhow::Result<Option<Chat>> {
        let removed = self
            .chats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed.is_some() {
            self.messages
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(id);
        }
        Ok(removed)
    }

    async fn save_messages(&self, messages: Vec<ChatMessage>) -> anyhow::Result<()> {
        let mut store = self.messages.write().unwrap_or_else(PoisonError::into_inner);
        for message in messages {
            let thread = store.entry(message.chat_id.clone()).or_default();
            // Re-saving a message replaces it in place.
            match thread.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => *existing = message,
                None => thread.push(message),
            }
        }
        Ok(())
    }

    async fn get_messages(&self, chat_id: &str) -> anyhow::Result<Vec<ChatMessage>> {
        let store = self.messages.read().unwrap_or_else(PoisonError::into_inner);
        Ok(store.get(chat_id).cloned().unwrap_or_default())
    }
}
