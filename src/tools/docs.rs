use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, ToolConfig, ToolContext, ToolError, ToolId, ToolResponse, missing_field, str_field};

const PROVIDER: &str = "google-docs";

/// Create a Google Doc, optionally seeded with text.
#[derive(Debug)]
pub struct DocsTool {
    ctx: Arc<ToolContext>,
    config: ToolConfig,
}

impl DocsTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        let config = ToolConfig::new(
            ToolId::GoogleDocs,
            "Google Docs",
            "Create a Google Docs document with optional initial content.",
        )
        .required(&["title"])
        .optional(&["content"])
        .capabilities(&["create documents", "write notes", "meeting notes", "google docs"])
        .parameters(json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "content": { "type": "string", "description": "Initial document text" }
            },
            "required": ["title"]
        }));
        Self { ctx, config }
    }
}

#[async_trait]
impl Tool for DocsTool {
    fn config(&self) -> &ToolConfig {
        &self.config
    }

    fn validate(&self, input: &Value) -> Option<ToolResponse> {
        missing_field(input, &[("title", "What should the document be called?")])
    }

    async fn execute(&self, user_id: &str, input: Value) -> Result<ToolResponse, ToolError> {
        let operation = "documents.create";
        let title = str_field(&input, "title").unwrap_or("Untitled document");
        let base = &self.ctx.endpoints.google_docs;

        let token = self.ctx.token(user_id, PROVIDER, operation).await?;
        let doc = self
            .ctx
            .send_json(
                self.ctx
                    .http
                    .post(format!("{base}/documents"))
                    .bearer_auth(&token.access_token)
                    .json(&json!({ "title": title })),
                PROVIDER,
                operation,
            )
            .await?;
        let Some(id) = doc.get("documentId").and_then(Value::as_str) else {
            return Err(ToolError::provider(PROVIDER, "response had no documentId"));
        };

        let url = format!("https://docs.google.com/document/d/{id}/edit");
        let content = input
            .get("content")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty());

        // The document exists from here on; a failed insert must not read as a failed create.
        let content_error = match content {
            Some(content) => self
                .ctx
                .send_json(
                    self.ctx
                        .http
                        .post(format!("{base}/documents/{id}:batchUpdate"))
                        .bearer_auth(&token.access_token)
                        .json(&json!({
                            "requests": [{
                                "insertText": { "location": { "index": 1 }, "text": content }
                            }]
                        })),
                    PROVIDER,
                    operation,
                )
                .await
                .err(),
            None => None,
        };

        let Some(err) = content_error else {
            return Ok(ToolResponse::ok(json!({
                "message": format!("Created \"{title}\": {url}"),
                "documentId": id,
                "url": url,
                "contentAdded": content.is_some(),
            })));
        };

        tracing::warn!(document_id = id, error = %err, "Document created but content insert failed");
        Ok(ToolResponse::ok(json!({
            "message": format!(
                "Created \"{title}\" ({url}), but its content could not be added: {err}. \
                 Add it to the existing document rather than creating another."
            ),
            "documentId": id,
            "url": url,
            "contentAdded": false,
            "contentError": err.to_string(),
        })))
    }
}
