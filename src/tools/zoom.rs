use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};

use super::calendar::meeting_window;
use super::{
    Tool, ToolConfig, ToolContext, ToolError, ToolId, ToolResponse, action, limit_field,
    missing_field, str_field, unknown_action,
};

const PROVIDER: &str = "zoom";
const ACTIONS: &[&str] = &["create_meeting", "list_meetings"];

/// Zoom scheduled meetings via `/users/me/meetings`.
#[derive(Debug)]
pub struct ZoomTool {
    ctx: Arc<ToolContext>,
    config: ToolConfig,
}

impl ZoomTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        let config = ToolConfig::new(
            ToolId::Zoom,
            "Zoom",
            "Create Zoom meetings and list upcoming ones.",
        )
        .required(&["topic"])
        .optional(&["date", "time", "duration", "timezone", "agenda"])
        .capabilities(&["create zoom meetings", "video meetings", "list zoom meetings"])
        .parameters(json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ACTIONS, "default": "create_meeting" },
                "topic": { "type": "string", "description": "Meeting topic" },
                "date": { "type": "string" },
                "time": { "type": "string" },
                "duration": { "type": "string", "description": "Length, e.g. \"45 minutes\"" },
                "timezone": { "type": "string" },
                "agenda": { "type": "string" }
            }
        }));
        Self { ctx, config }
    }

    async fn create_meeting(&self, user_id: &str, input: &Value) -> Result<ToolResponse, ToolError> {
        let operation = "meetings.create";
        let topic = str_field(input, "topic").unwrap_or("Meeting");
        let (start, _, minutes) = meeting_window(input);

        let mut body = json!({
            "topic": topic,
            "type": 2,
            "start_time": start.date.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true),
            "duration": minutes,
            "settings": {
                "join_before_host": false,
                "waiting_room": true,
            },
        });
        if start.timezone.contains('/') {
            body["timezone"] = json!(start.timezone);
        }
        if let Some(agenda) = str_field(input, "agenda") {
            body["agenda"] = json!(agenda);
        }

        let token = self.ctx.token(user_id, PROVIDER, operation).await?;
        let meeting = self
            .ctx
            .send_json(
                self.ctx
                    .http
                    .post(format!("{}/users/me/meetings", self.ctx.endpoints.zoom))
                    .bearer_auth(&token.access_token)
                    .json(&body),
                PROVIDER,
                operation,
            )
            .await?;

        let join_url = meeting
            .get("join_url")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut message = format!(
            "Created Zoom meeting \"{topic}\" on {} at {}.",
            start.formatted_date, start.formatted_time
        );
        if !join_url.is_empty() {
            let _ = write!(message, " Join: {join_url}");
        }

        Ok(ToolResponse::ok(json!({
            "message": message,
            "meetingId": meeting.get("id"),
            "joinUrl": join_url,
            "password": meeting.get("password"),
            "start": start.iso_string,
            "duration": minutes,
        })))
    }

    async fn list_meetings(&self, user_id: &str, input: &Value) -> Result<ToolResponse, ToolError> {
        let operation = "meetings.list";
        let token = self.ctx.token(user_id, PROVIDER, operation).await?;
        let body = self
            .ctx
            .send_json(
                self.ctx
                    .http
                    .get(format!("{}/users/me/meetings", self.ctx.endpoints.zoom))
                    .bearer_auth(&token.access_token)
                    .query(&[("type", "upcoming".to_string())])
                    .query(&[("page_size", limit_field(input, 30))]),
                PROVIDER,
                operation,
            )
            .await?;

        let meetings = body
            .get("meetings")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut message = if meetings.is_empty() {
            "You have no upcoming Zoom meetings.".to_string()
        } else {
            format!("You have {} upcoming Zoom meetings:", meetings.len())
        };
        for m in &meetings {
            let _ = write!(
                message,
                "\n- {} ({})",
                m.get("topic").and_then(Value::as_str).unwrap_or_default(),
                m.get("start_time").and_then(Value::as_str).unwrap_or_default()
            );
        }

        Ok(ToolResponse::ok(json!({ "message": message, "meetings": meetings })))
    }
}

#[async_trait]
impl Tool for ZoomTool {
    fn config(&self) -> &ToolConfig {
        &self.config
    }

    fn validate(&self, input: &Value) -> Option<ToolResponse> {
        match action(input, "create_meeting") {
            "create_meeting" => {
                missing_field(input, &[("topic", "What is the meeting about?")])
            }
            "list_meetings" => None,
            other => Some(unknown_action(other, ACTIONS)),
        }
    }

    async fn execute(&self, user_id: &str, input: Value) -> Result<ToolResponse, ToolError> {
        match action(&input, "create_meeting") {
            "list_meetings" => self.list_meetings(user_id, &input).await,
            _ => self.create_meeting(user_id, &input).await,
        }
    }
}
