//! Chat domain: storage, tool gating and connection markers.

pub mod classify;
pub mod markers;
pub mod store;

pub use classify::{Intent, classify};
pub use markers::{ConnectionMarker, append_markers, detect_markers, parse_markers};
pub use store::{Chat, ChatMessage, ChatStore, InMemoryChatStore, MessagePart};

use chrono::{DateTime, Utc};

/// System prompt for a chat turn. Carries the current date so the model can
/// pass relative dates ("tomorrow", "next friday") straight to the tools.
pub fn system_prompt(now: DateTime<Utc>) -> String {
    format!(
        "You are a helpful assistant that works with the user's SaaS accounts: \
         Google Calendar, Google Meet, Google Docs, Zoom, Slack, LinkedIn, \
         Microsoft Teams and the company CRM.\n\
         Today is {} (UTC {}).\n\
         When a request needs one of these services, call the matching tool. \
         Pass dates and times exactly as the user said them; the tools resolve \
         relative dates. If a tool reports that a service is not connected, \
         ask the user to connect it and do not retry the tool.\n\
         Keep answers short.",
        now.format("%A, %B %-d, %Y"),
        now.format("%H:%M"),
    )
}

/// Chat title from the first user message.
pub fn title_from(text: &str) -> String {
    const MAX: usize = 80;
    let line = text.lines().next().unwrap_or_default().trim();
    if line.is_empty() {
        return "New chat".to_string();
    }
    if line.chars().count() <= MAX {
        return line.to_string();
    }
    let mut title: String = line.chars().take(MAX).collect();
    title.push('…');
    title
}
