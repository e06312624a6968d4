//! Google Calendar: list upcoming events and create events.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{Value, json};

use crate::dates::{ParsedDate, parse_relative_date, resolve_timezone};

use super::{
    Tool, ToolConfig, ToolContext, ToolError, ToolId, ToolResponse, action, duration_field,
    limit_field, missing_field, str_field, string_list, unknown_action,
};

const PROVIDER: &str = "google-calendar";
const ACTIONS: &[&str] = &["create_event", "list_events"];

/// Calendar `EventDateTime`. The zone name is only sent when Google will
/// understand it; the offset in `dateTime` is authoritative either way.
pub(crate) fn event_time(date_time: &str, timezone: &str) -> Value {
    if timezone.contains('/') || timezone.eq_ignore_ascii_case("utc") {
        json!({ "dateTime": date_time, "timeZone": timezone })
    } else {
        json!({ "dateTime": date_time })
    }
}

/// Start and end of a meeting described by `date`, `time`, `duration` and
/// `timezone` fields.
pub(crate) fn meeting_window(input: &Value) -> (ParsedDate, String, i64) {
    let timezone = str_field(input, "timezone").unwrap_or("UTC");
    let start = parse_relative_date(
        str_field(input, "date").unwrap_or("today"),
        str_field(input, "time").unwrap_or(""),
        Utc::now(),
        timezone,
    );
    let minutes = duration_field(input, "duration");
    let end = start
        .plus_minutes(minutes)
        .to_rfc3339_opts(SecondsFormat::Secs, false);
    (start, end, minutes)
}

#[derive(Debug)]
pub struct CalendarTool {
    ctx: Arc<ToolContext>,
    config: ToolConfig,
}

impl CalendarTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        let config = ToolConfig::new(
            ToolId::GoogleCalendar,
            "Google Calendar",
            "Create calendar events and list upcoming events in the user's Google Calendar. \
             Dates may be relative (\"tomorrow\", \"next friday\").",
        )
        .required(&["title", "date"])
        .optional(&["time", "duration", "attendees", "description", "timezone", "location"])
        .capabilities(&[
            "schedule meetings",
            "create calendar events",
            "list calendar events",
            "check availability",
        ])
        .parameters(json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ACTIONS, "default": "create_event" },
                "title": { "type": "string", "description": "Event title" },
                "date": { "type": "string", "description": "Date, e.g. \"tomorrow\", \"next friday\", \"2024-03-19\"" },
                "time": { "type": "string", "description": "Start time, e.g. \"2pm\", \"14:30\"" },
                "duration": { "type": "string", "description": "Length, e.g. \"1 hour\" or minutes" },
                "attendees": { "type": "array", "items": { "type": "string" }, "description": "Attendee emails" },
                "description": { "type": "string" },
                "location": { "type": "string" },
                "timezone": { "type": "string", "description": "IANA timezone, default UTC" },
                "days": { "type": "integer", "description": "For list_events: how many days ahead" }
            }
        }));
        Self { ctx, config }
    }

    async fn create_event(&self, user_id: &str, input: &Value) -> Result<ToolResponse, ToolError> {
        let title = str_field(input, "title").unwrap_or("Meeting");
        let timezone = str_field(input, "timezone").unwrap_or("UTC");
        let (start, end, minutes) = meeting_window(input);
        let attendees: Vec<String> = string_list(input, "attendees")
            .into_iter()
            .filter(|a| a.contains('@'))
            .collect();

        let mut body = json!({
            "summary": title,
            "start": event_time(&start.iso_string, timezone),
            "end": event_time(&end, timezone),
            "attendees": attendees.iter().map(|email| json!({ "email": email })).collect::<Vec<_>>(),
        });
        if let Some(description) = str_field(input, "description") {
            body["description"] = json!(description);
        }
        if let Some(location) = str_field(input, "location") {
            body["location"] = json!(location);
        }

        let token = self.ctx.token(user_id, PROVIDER, "events.create").await?;
        let url = format!("{}/calendars/primary/events", self.ctx.endpoints.google_calendar);
        let created = self
            .ctx
            .send_json(
                self.ctx
                    .http
                    .post(url)
                    .bearer_auth(&token.access_token)
                    .query(&[("sendUpdates", "all")])
                    .json(&body),
                PROVIDER,
                "events.create",
            )
            .await?;

        let mut message = format!(
            "Scheduled \"{title}\" on {} at {} ({minutes} min).",
            start.formatted_date, start.formatted_time
        );
        if !attendees.is_empty() {
            let _ = write!(message, " Invited {}.", attendees.join(", "));
        }

        Ok(ToolResponse::ok(json!({
            "message": message,
            "eventId": created.get("id"),
            "htmlLink": created.get("htmlLink"),
            "start": start.iso_string,
            "end": end,
            "attendees": attendees,
        })))
    }

    async fn list_events(&self, user_id: &str, input: &Value) -> Result<ToolResponse, ToolError> {
        let (zone, timezone) = resolve_timezone(str_field(input, "timezone").unwrap_or("UTC"));
        let now = zone.at(Utc::now());
        let from = match str_field(input, "date") {
            Some(date) => {
                let day = parse_relative_date(date, "", Utc::now(), &timezone)
                    .date
                    .date_naive();
                zone.localize(day.and_time(chrono::NaiveTime::MIN))
                    .unwrap_or(now)
            }
            None => now,
        };
        let days = input
            .get("days")
            .and_then(Value::as_i64)
            .map_or(7, |d| d.clamp(1, 90));
        let until = from + Duration::days(days);

        let token = self.ctx.token(user_id, PROVIDER, "events.list").await?;
        let url = format!("{}/calendars/primary/events", self.ctx.endpoints.google_calendar);
        let listed = self
            .ctx
            .send_json(
                self.ctx
                    .http
                    .get(url)
                    .bearer_auth(&token.access_token)
                    .query(&[
                        ("timeMin", from.to_rfc3339_opts(SecondsFormat::Secs, true)),
                        ("timeMax", until.to_rfc3339_opts(SecondsFormat::Secs, true)),
                        ("singleEvents", "true".to_string()),
                        ("orderBy", "startTime".to_string()),
                        ("maxResults", limit_field(input, 25).to_string()),
                    ]),
                PROVIDER,
                "events.list",
            )
            .await?;

        let events: Vec<Value> = listed
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        json!({
                            "id": item.get("id"),
                            "title": item.get("summary").and_then(Value::as_str).unwrap_or("(no title)"),
                            "start": item.pointer("/start/dateTime").or_else(|| item.pointer("/start/date")),
                            "end": item.pointer("/end/dateTime").or_else(|| item.pointer("/end/date")),
                            "htmlLink": item.get("htmlLink"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut message = if events.is_empty() {
            format!("No events in the next {days} days.")
        } else {
            format!("You have {} events in the next {days} days:", events.len())
        };
        for event in &events {
            let _ = write!(
                message,
                "\n- {} ({})",
                event["title"].as_str().unwrap_or_default(),
                event["start"].as_str().unwrap_or_default()
            );
        }

        Ok(ToolResponse::ok(json!({ "message": message, "events": events })))
    }
}

#[async_trait]
impl Tool for CalendarTool {
    fn config(&self) -> &ToolConfig {
        &self.config
    }

    fn validate(&self, input: &Value) -> Option<ToolResponse> {
        match action(input, "create_event") {
            "create_event" => missing_field(
                input,
                &[
                    ("title", "What should the event be called?"),
                    ("date", "What day should it be scheduled for?"),
                ],
            ),
            "list_events" => None,
            other => Some(unknown_action(other, ACTIONS)),
        }
    }

    async fn execute(&self, user_id: &str, input: Value) -> Result<ToolResponse, ToolError> {
        match action(&input, "create_event") {
            "list_events" => self.list_events(user_id, &input).await,
            _ => self.create_event(user_id, &input).await,
        }
    }
}
