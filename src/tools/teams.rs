//! Microsoft Teams through Microsoft Graph.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};

use super::calendar::meeting_window;
use super::{
    Tool, ToolConfig, ToolContext, ToolError, ToolId, ToolResponse, action, missing_field,
    str_field, unknown_action,
};

const PROVIDER: &str = "microsoft-teams";
const ACTIONS: &[&str] = &["create_meeting", "send_message"];

#[derive(Debug)]
pub struct TeamsTool {
    ctx: Arc<ToolContext>,
    config: ToolConfig,
}

impl TeamsTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        let config = ToolConfig::new(
            ToolId::MicrosoftTeams,
            "Microsoft Teams",
            "Create Teams online meetings and post messages to Teams channels.",
        )
        .optional(&["action", "subject", "date", "time", "duration", "timezone", "teamId", "channelId", "text"])
        .capabilities(&["create teams meetings", "video meetings", "send messages", "teams"])
        .parameters(json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ACTIONS, "default": "create_meeting" },
                "subject": { "type": "string" },
                "date": { "type": "string" },
                "time": { "type": "string" },
                "duration": { "type": "string" },
                "timezone": { "type": "string" },
                "teamId": { "type": "string" },
                "channelId": { "type": "string" },
                "text": { "type": "string" }
            }
        }));
        Self { ctx, config }
    }

    async fn create_meeting(&self, user_id: &str, input: &Value) -> Result<ToolResponse, ToolError> {
        let operation = "meetings.create";
        let subject = str_field(input, "subject").unwrap_or("Meeting");
        let (start, _, minutes) = meeting_window(input);
        let start_utc = start.date.with_timezone(&Utc);
        let end_utc = start_utc + chrono::Duration::minutes(minutes);

        let token = self.ctx.token(user_id, PROVIDER, operation).await?;
        let meeting = self
            .ctx
            .send_json(
                self.ctx
                    .http
                    .post(format!("{}/me/onlineMeetings", self.ctx.endpoints.microsoft_graph))
                    .bearer_auth(&token.access_token)
                    .json(&json!({
                        "subject": subject,
                        "startDateTime": start_utc.to_rfc3339_opts(SecondsFormat::Secs, true),
                        "endDateTime": end_utc.to_rfc3339_opts(SecondsFormat::Secs, true),
                    })),
                PROVIDER,
                operation,
            )
            .await?;

        let join_url = meeting
            .get("joinWebUrl")
            .or_else(|| meeting.get("joinUrl"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        Ok(ToolResponse::ok(json!({
            "message": format!(
                "Created Teams meeting \"{subject}\" on {} at {}. Join: {join_url}",
                start.formatted_date, start.formatted_time
            ),
            "meetingId": meeting.get("id"),
            "joinUrl": join_url,
            "start": start.iso_string,
            "duration": minutes,
        })))
    }

    async fn send_message(&self, user_id: &str, input: &Value) -> Result<ToolResponse, ToolError> {
        let operation = "messages.send";
        let team = str_field(input, "teamId").unwrap_or_default();
        let channel = str_field(input, "channelId").unwrap_or_default();
        let text = str_field(input, "text").unwrap_or_default();

        let token = self.ctx.token(user_id, PROVIDER, operation).await?;
        let sent = self
            .ctx
            .send_json(
                self.ctx
                    .http
                    .post(format!(
                        "{}/teams/{team}/channels/{channel}/messages",
                        self.ctx.endpoints.microsoft_graph
                    ))
                    .bearer_auth(&token.access_token)
                    .json(&json!({ "body": { "contentType": "text", "content": text } })),
                PROVIDER,
                operation,
            )
            .await?;

        Ok(ToolResponse::ok(json!({
            "message": "Message posted to Teams.",
            "messageId": sent.get("id"),
            "webUrl": sent.get("webUrl"),
        })))
    }
}

#[async_trait]
impl Tool for TeamsTool {
    fn config(&self) -> &ToolConfig {
        &self.config
    }

    fn validate(&self, input: &Value) -> Option<ToolResponse> {
        match action(input, "create_meeting") {
            "create_meeting" => {
                missing_field(input, &[("subject", "What is the meeting about?")])
            }
            "send_message" => missing_field(
                input,
                &[
                    ("teamId", "Which team should I post to?"),
                    ("channelId", "Which channel in that team?"),
                    ("text", "What should the message say?"),
                ],
            ),
            other => Some(unknown_action(other, ACTIONS)),
        }
    }

    async fn execute(&self, user_id: &str, input: Value) -> Result<ToolResponse, ToolError> {
        match action(&input, "create_meeting") {
            "send_message" => self.send_message(user_id, &input).await,
            _ => self.create_meeting(user_id, &input).await,
        }
    }
}
