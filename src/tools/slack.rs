//! Slack Web API: post messages and list channels.
//!
//! Slack answers most failures with HTTP 200 and `{"ok": false, "error"}`,
//! so the body is inspected after every call.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    Tool, ToolConfig, ToolContext, ToolError, ToolId, ToolResponse, action, limit_field,
    missing_field, str_field, unknown_action,
};

const PROVIDER: &str = "slack";
const ACTIONS: &[&str] = &["send_message", "list_channels"];

#[derive(Debug)]
pub struct SlackTool {
    ctx: Arc<ToolContext>,
    config: ToolConfig,
}

impl SlackTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        let config = ToolConfig::new(
            ToolId::Slack,
            "Slack",
            "Send Slack messages to a channel and list the channels the user can see.",
        )
        .optional(&["action", "channel", "text", "limit"])
        .capabilities(&["send messages", "slack", "list channels", "notify team"])
        .parameters(json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ACTIONS, "default": "send_message" },
                "channel": { "type": "string", "description": "Channel id or #name" },
                "text": { "type": "string", "description": "Message text" },
                "limit": { "type": "integer" }
            }
        }));
        Self { ctx, config }
    }

    async fn call(
        &self,
        user_id: &str,
        operation: &str,
        request: impl FnOnce(&reqwest::Client, &str) -> reqwest::RequestBuilder + Send,
    ) -> Result<Value, ToolError> {
        let token = self.ctx.token(user_id, PROVIDER, operation).await?;
        let body = self
            .ctx
            .send_json(
                request(&self.ctx.http, &self.ctx.endpoints.slack).bearer_auth(&token.access_token),
                PROVIDER,
                operation,
            )
            .await?;
        self.check_ok(body, operation).await
    }

    async fn check_ok(&self, body: Value, operation: &str) -> Result<Value, ToolError> {
        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(body);
        }
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        match error {
            "not_authed" | "invalid_auth" | "token_revoked" | "token_expired" | "account_inactive" => {
                Err(ToolError::ConnectionRequired {
                    provider: PROVIDER.to_string(),
                    required_scopes: self
                        .ctx
                        .broker
                        .resolver()
                        .get_required_scopes(PROVIDER, operation)
                        .await,
                })
            }
            "missing_scope" => Err(ToolError::InsufficientScopes {
                provider: PROVIDER.to_string(),
                required_scopes: body
                    .get("needed")
                    .and_then(Value::as_str)
                    .map(|s| s.split(',').map(str::to_string).collect())
                    .unwrap_or_default(),
                current_scopes: body
                    .get("provided")
                    .and_then(Value::as_str)
                    .map(|s| s.split(',').map(str::to_string).collect())
                    .unwrap_or_default(),
            }),
            "ratelimited" => Err(ToolError::RateLimited {
                provider: PROVIDER.to_string(),
            }),
            other => Err(ToolError::provider(PROVIDER, other)),
        }
    }

    async fn send_message(&self, user_id: &str, input: &Value) -> Result<ToolResponse, ToolError> {
        let channel = str_field(input, "channel").unwrap_or_default();
        let text = str_field(input, "text").unwrap_or_default();
        let body = json!({ "channel": channel, "text": text });

        let sent = self
            .call(user_id, "messages.send", |http, base| {
                http.post(format!("{base}/chat.postMessage")).json(&body)
            })
            .await?;

        Ok(ToolResponse::ok(json!({
            "message": format!("Posted to {channel}."),
            "channel": sent.get("channel"),
            "ts": sent.get("ts"),
        })))
    }

    async fn list_channels(&self, user_id: &str, input: &Value) -> Result<ToolResponse, ToolError> {
        let limit = limit_field(input, 100);
        let listed = self
            .call(user_id, "channels.list", |http, base| {
                http.get(format!("{base}/conversations.list")).query(&[
                    ("limit", limit.to_string()),
                    ("exclude_archived", "true".to_string()),
                    ("types", "public_channel,private_channel".to_string()),
                ])
            })
            .await?;

        let channels: Vec<Value> = listed
            .get("channels")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.get("id"),
                            "name": c.get("name"),
                            "isPrivate": c.get("is_private").and_then(Value::as_bool).unwrap_or(false),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut message = format!("Found {} channels:", channels.len());
        for c in &channels {
            let _ = write!(message, "\n- #{}", c["name"].as_str().unwrap_or_default());
        }

        Ok(ToolResponse::ok(json!({ "message": message, "channels": channels })))
    }
}

#[async_trait]
impl Tool for SlackTool {
    fn config(&self) -> &ToolConfig {
        &self.config
    }

    fn validate(&self, input: &Value) -> Option<ToolResponse> {
        match action(input, "send_message") {
            "send_message" => missing_field(
                input,
                &[
                    ("channel", "Which channel should I post to?"),
                    ("text", "What should the message say?"),
                ],
            ),
            "list_channels" => None,
            other => Some(unknown_action(other, ACTIONS)),
        }
    }

    async fn execute(&self, user_id: &str, input: Value) -> Result<ToolResponse, ToolError> {
        match action(&input, "send_message") {
            "list_channels" => self.list_channels(user_id, &input).await,
            _ => self.send_message(user_id, &input).await,
        }
    }
}
