use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::calendar::{event_time, meeting_window};
use super::{
    Tool, ToolConfig, ToolContext, ToolError, ToolId, ToolResponse, missing_field, str_field,
    string_list,
};

const PROVIDER: &str = "google-meet";

/// Google Meet links are minted by creating a calendar event with a
/// conference request.
#[derive(Debug)]
pub struct MeetTool {
    ctx: Arc<ToolContext>,
    config: ToolConfig,
}

impl MeetTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        let config = ToolConfig::new(
            ToolId::GoogleMeet,
            "Google Meet",
            "Create a Google Meet video meeting and calendar invite.",
        )
        .required(&["title"])
        .optional(&["date", "time", "duration", "attendees", "timezone"])
        .capabilities(&["create google meet", "video meetings", "schedule meetings"])
        .parameters(json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "date": { "type": "string" },
                "time": { "type": "string" },
                "duration": { "type": "string" },
                "attendees": { "type": "array", "items": { "type": "string" } },
                "timezone": { "type": "string" }
            },
            "required": ["title"]
        }));
        Self { ctx, config }
    }
}

fn meet_link(event: &Value) -> Option<&str> {
    event.get("hangoutLink").and_then(Value::as_str).or_else(|| {
        event
            .pointer("/conferenceData/entryPoints")?
            .as_array()?
            .iter()
            .find(|e| e.get("entryPointType").and_then(Value::as_str) == Some("video"))?
            .get("uri")?
            .as_str()
    })
}

#[async_trait]
impl Tool for MeetTool {
    fn config(&self) -> &ToolConfig {
        &self.config
    }

    fn validate(&self, input: &Value) -> Option<ToolResponse> {
        missing_field(input, &[("title", "What should the meeting be called?")])
    }

    async fn execute(&self, user_id: &str, input: Value) -> Result<ToolResponse, ToolError> {
        let operation = "meetings.create";
        let title = str_field(&input, "title").unwrap_or("Meeting");
        let timezone = str_field(&input, "timezone").unwrap_or("UTC");
        let (start, end, _) = meeting_window(&input);
        let attendees: Vec<Value> = string_list(&input, "attendees")
            .into_iter()
            .filter(|a| a.contains('@'))
            .map(|email| json!({ "email": email }))
            .collect();

        let body = json!({
            "summary": title,
            "start": event_time(&start.iso_string, timezone),
            "end": event_time(&end, timezone),
            "attendees": attendees,
            "conferenceData": {
                "createRequest": {
                    "requestId": uuid::Uuid::new_v4().to_string(),
                    "conferenceSolutionKey": { "type": "hangoutsMeet" },
                }
            },
        });

        let token = self.ctx.token(user_id, PROVIDER, operation).await?;
        let event = self
            .ctx
            .send_json(
                self.ctx
                    .http
                    .post(format!(
                        "{}/calendars/primary/events",
                        self.ctx.endpoints.google_calendar
                    ))
                    .bearer_auth(&token.access_token)
                    .query(&[("conferenceDataVersion", "1"), ("sendUpdates", "all")])
                    .json(&body),
                PROVIDER,
                operation,
            )
            .await?;

        let Some(link) = meet_link(&event) else {
            return Err(ToolError::provider(
                PROVIDER,
                "the event was created without a Meet link",
            ));
        };

        Ok(ToolResponse::ok(json!({
            "message": format!(
                "Created Google Meet \"{title}\" on {} at {}. Join: {link}",
                start.formatted_date, start.formatted_time
            ),
            "meetLink": link,
            "eventId": event.get("id"),
            "htmlLink": event.get("htmlLink"),
            "start": start.iso_string,
            "end": end,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_from_hangout_or_entry_points() {
        assert_eq!(
            meet_link(&json!({"hangoutLink": "https://meet.google.com/abc"})),
            Some("https://meet.google.com/abc")
        );
        let event = json!({"conferenceData": {"entryPoints": [
            {"entryPointType": "phone", "uri": "tel:+1"},
            {"entryPointType": "video", "uri": "https://meet.google.com/xyz"}
        ]}});
        assert_eq!(meet_link(&event), Some("https://meet.google.com/xyz"));
        assert_eq!(meet_link(&json!({})), None);
    }
}
