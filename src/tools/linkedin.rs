use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, ToolConfig, ToolContext, ToolError, ToolId, ToolResponse, missing_field, str_field};

const PROVIDER: &str = "linkedin";
const MAX_POST_CHARS: usize = 3000;

/// Share a text post on the user's LinkedIn profile.
#[derive(Debug)]
pub struct LinkedinTool {
    ctx: Arc<ToolContext>,
    config: ToolConfig,
}

impl LinkedinTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        let config = ToolConfig::new(
            ToolId::Linkedin,
            "LinkedIn",
            "Publish a text post to the user's LinkedIn profile.",
        )
        .required(&["text"])
        .optional(&["visibility"])
        .capabilities(&["post to linkedin", "share updates", "social media"])
        .parameters(json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Post body" },
                "visibility": { "type": "string", "enum": ["PUBLIC", "CONNECTIONS"], "default": "PUBLIC" }
            },
            "required": ["text"]
        }));
        Self { ctx, config }
    }
}

#[async_trait]
impl Tool for LinkedinTool {
    fn config(&self) -> &ToolConfig {
        &self.config
    }

    fn validate(&self, input: &Value) -> Option<ToolResponse> {
        if let Some(missing) = missing_field(input, &[("text", "What would you like to post?")]) {
            return Some(missing);
        }
        let len = str_field(input, "text").map_or(0, |t| t.chars().count());
        (len > MAX_POST_CHARS).then(|| {
            ToolResponse::needs_input(
                "text",
                format!("LinkedIn posts are limited to {MAX_POST_CHARS} characters; this one has {len}."),
            )
        })
    }

    async fn execute(&self, user_id: &str, input: Value) -> Result<ToolResponse, ToolError> {
        let operation = "posts.create";
        let text = str_field(&input, "text").unwrap_or_default();
        let visibility = match str_field(&input, "visibility").map(str::to_uppercase).as_deref() {
            Some("CONNECTIONS") => "CONNECTIONS",
            _ => "PUBLIC",
        };
        let base = &self.ctx.endpoints.linkedin;

        let token = self.ctx.token(user_id, PROVIDER, operation).await?;
        let me = self
            .ctx
            .send_json(
                self.ctx
                    .http
                    .get(format!("{base}/v2/userinfo"))
                    .bearer_auth(&token.access_token),
                PROVIDER,
                operation,
            )
            .await?;
        let Some(person) = me.get("sub").and_then(Value::as_str) else {
            return Err(ToolError::provider(PROVIDER, "profile response had no member id"));
        };

        let body = json!({
            "author": format!("urn:li:person:{person}"),
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": text },
                    "shareMediaCategory": "NONE",
                }
            },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": visibility },
        });
        let post = self
            .ctx
            .send_json(
                self.ctx
                    .http
                    .post(format!("{base}/v2/ugcPosts"))
                    .bearer_auth(&token.access_token)
                    .header("X-Restli-Protocol-Version", "2.0.0")
                    .json(&body),
                PROVIDER,
                operation,
            )
            .await?;

        let post_id = post.get("id").and_then(Value::as_str);
        Ok(ToolResponse::ok(json!({
            "message": format!("Posted to LinkedIn ({}).", visibility.to_lowercase()),
            "postId": post_id,
            "url": post_id.map(|id| format!("https://www.linkedin.com/feed/update/{id}")),
        })))
    }
}
