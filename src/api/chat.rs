//! `/api/chat`: streamed chat turns, export and deletion.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::{CurrentUser, RequireUser};
use crate::chat::{
    self, Chat, ChatMessage, ChatStore, MessagePart, append_markers, classify, detect_markers,
};
use crate::error::{AppError, AppResult};
use crate::llm::{Message, MessageRole};
use crate::normalized::NormalizedEvent;
use crate::server::AppState;

use super::extract::{ApiJson, ApiQuery};

use super::sse::build_sse_response;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub id: String,
    pub messages: Vec<IncomingMessage>,
}

/// A message as the chat UI sends it: plain `content`, typed `parts`, or both.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: MessageRole,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub parts: Vec<Value>,
}

impl IncomingMessage {
    pub fn text(&self) -> String {
        if let Some(content) = self.content.as_deref().filter(|c| !c.is_empty()) {
            return content.to_string();
        }
        self.parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct ChatExport {
    pub chat: Chat,
    pub messages: Vec<ChatMessage>,
}

/// `POST /api/chat`
pub async fn post_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(req): ApiJson<ChatRequest>,
) -> AppResult<Response> {
    let Some(last_user) = req
        .messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
    else {
        return Err(AppError::BadRequest("no user message in request".to_string()));
    };
    let user_text = last_user.text();
    if user_text.trim().is_empty() {
        return Err(AppError::BadRequest("user message is empty".to_string()));
    }

    let user_id = user.user_id().to_string();
    let persist = !user.is_anonymous();

    if persist {
        match state.chats.get_chat(&req.id).await? {
            Some(existing) if existing.user_id != user_id => {
                return Err(AppError::Forbidden(
                    "chat belongs to another user".to_string(),
                ));
            }
            Some(_) => {}
            None => {
                state
                    .chats
                    .save_chat(Chat {
                        id: req.id.clone(),
                        user_id: user_id.clone(),
                        title: chat::title_from(&user_text),
                        created_at: Utc::now(),
                    })
                    .await?;
            }
        }

        state
            .chats
            .save_messages(vec![ChatMessage {
                id: last_user
                    .id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                chat_id: req.id.clone(),
                role: MessageRole::User,
                parts: vec![MessagePart::Text {
                    text: user_text.clone(),
                }],
                attachments: Vec::new(),
                created_at: Utc::now(),
            }])
            .await?;
    }

    let intent = classify(&user_text);
    tracing::info!(
        chat_id = %req.id,
        user_id = %user_id,
        use_tools = intent.use_tools,
        matched = ?intent.matched,
        "Chat turn received"
    );

    let mut messages = vec![Message::system(chat::system_prompt(Utc::now()))];
    messages.extend(req.messages.iter().filter_map(|m| {
        let text = m.text();
        if text.is_empty() {
            return None;
        }
        match m.role {
            MessageRole::User => Some(Message::user(text)),
            MessageRole::Assistant => Some(Message::assistant(text)),
            MessageRole::System | MessageRole::Tool => None,
        }
    }));

    let events = state
        .orchestrator
        .chat_with_history(&user_id, messages, intent.use_tools);

    let store = persist.then(|| Arc::clone(&state.chats));
    let chat_id = req.id;

    let stream = async_stream::stream! {
        let mut text = String::new();
        let mut parts: Vec<MessagePart> = Vec::new();

        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            match &event {
                NormalizedEvent::MessageDelta { text: delta } => text.push_str(delta),
                NormalizedEvent::ToolResult { id, name, result } => {
                    parts.push(MessagePart::ToolResult {
                        tool_call_id: id.clone(),
                        tool_name: name.clone(),
                        result: result.clone(),
                    });
                }
                _ => {}
            }
            yield event;
        }

        if let Some(store) = store {
            save_assistant_message(store.as_ref(), &chat_id, text, parts).await;
        }
    };

    Ok(build_sse_response(stream).into_response())
}

/// Store the finished assistant turn, with connection markers appended when
/// the turn asked the user to connect a provider.
async fn save_assistant_message(
    store: &dyn ChatStore,
    chat_id: &str,
    text: String,
    mut parts: Vec<MessagePart>,
) {
    let results: Vec<_> = parts
        .iter()
        .filter_map(|p| match p {
            MessagePart::ToolResult { result, .. } => Some(result.clone()),
            MessagePart::Text { .. } => None,
        })
        .collect();

    let markers = detect_markers(&text, &results);
    let text = if markers.is_empty() {
        text
    } else {
        tracing::debug!(chat_id, services = ?markers.iter().map(|m| &m.service).collect::<Vec<_>>(), "Appending connection markers");
        append_markers(&text, &markers)
    };
    parts.insert(0, MessagePart::Text { text });

    let message = ChatMessage {
        id: Uuid::new_v4().to_string(),
        chat_id: chat_id.to_string(),
        role: MessageRole::Assistant,
        parts,
        attachments: Vec::new(),
        created_at: Utc::now(),
    };

    if let Err(e) = store.save_messages(vec![message]).await {
        tracing::error!(chat_id, error = %e, "Failed to save assistant message");
    }
}

/// `GET /api/chat?id=`
pub async fn export_chat(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    ApiQuery(query): ApiQuery<ChatQuery>,
) -> AppResult<Json<ChatExport>> {
    let chat = owned_chat(state.chats.as_ref(), &query.id, &user.user_id).await?;
    let messages = state.chats.get_messages(&chat.id).await?;
    Ok(Json(ChatExport { chat, messages }))
}

/// `DELETE /api/chat?id=`
pub async fn delete_chat(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    ApiQuery(query): ApiQuery<ChatQuery>,
) -> AppResult<Json<Chat>> {
    owned_chat(state.chats.as_ref(), &query.id, &user.user_id).await?;
    let deleted = state
        .chats
        .delete_chat(&query.id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("chat {} not found", query.id)))?;

    tracing::info!(chat_id = %deleted.id, user_id = %user.user_id, "Chat deleted");
    Ok(Json(deleted))
}

async fn owned_chat(store: &dyn ChatStore, id: &str, user_id: &str) -> AppResult<Chat> {
    let chat = store
        .get_chat(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("chat {id} not found")))?;
    if chat.user_id != user_id {
        tracing::warn!(chat_id = id, user_id, "Chat access by non-owner refused");
        return Err(AppError::Forbidden("chat belongs to another user".to_string()));
    }
    Ok(chat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_prefers_content_then_parts() {
        let msg: IncomingMessage = serde_json::from_value(json!({
            "role": "user",
            "parts": [
                {"type": "text", "text": "Book "},
                {"type": "file", "url": "x"},
                {"type": "text", "text": "a room"}
            ]
        }))
        .unwrap();
        assert_eq!(msg.text(), "Book a room");

        let msg: IncomingMessage =
            serde_json::from_value(json!({"role": "user", "content": "hi", "parts": []})).unwrap();
        assert_eq!(msg.text(), "hi");
    }

    #[tokio::test]
    async fn assistant_message_gets_marker() {
        let store = crate::chat::InMemoryChatStore::new();
        let parts = vec![MessagePart::ToolResult {
            tool_call_id: "call_1".into(),
            tool_name: "zoom".into(),
            result: crate::tools::ToolResponse::create_connection_request(
                "zoom",
                &[],
                "Please connect Zoom",
            ),
        }];
        save_assistant_message(&store, "c1", "You need to connect Zoom.".into(), parts).await;

        let saved = store.get_messages("c1").await.unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].text().contains(r#"<connection:{"service":"zoom""#));
        assert_eq!(saved[0].parts.len(), 2);
    }
}
