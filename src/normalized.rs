//! Streaming event model shared by the LLM driver, the orchestrator and the
//! chat endpoint.
//!
//! ```rust
//! use saas_assistant::normalized::{NormalizedEvent, sse_event};
//!
//! let sse = sse_event(&NormalizedEvent::MessageDelta { text: "Hello".into() });
//! assert!(sse.starts_with("event: message.delta\n"));
//! ```

use serde::{Deserialize, Serialize};

use crate::tools::ToolResponse;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum NormalizedEvent {
    /// First event of every response.
    #[serde(rename = "stream.start")]
    StreamStart { request_id: String },

    #[serde(rename = "message.delta")]
    MessageDelta { text: String },

    /// Fragment of a tool call as the model streams it.
    #[serde(rename = "tool_call.delta")]
    ToolCallDelta {
        call_index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments_delta: Option<String>,
    },

    /// Tool call fully assembled and about to run.
    #[serde(rename = "tool_call.complete")]
    ToolCallComplete {
        call_index: usize,
        id: String,
        name: String,
        arguments_json: String,
    },

    /// Outcome of a tool call, including any UI hint.
    #[serde(rename = "tool_result")]
    ToolResult {
        id: String,
        name: String,
        result: ToolResponse,
    },

    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    #[serde(rename = "done")]
    Done,
}

/// Frame an event as `event:` + `data:` SSE lines.
pub fn sse_event(evt: &NormalizedEvent) -> String {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    });

    format!("event: {}\ndata: {json}\n\n", event_name(evt))
}

/// SSE event name; matches the serde tag.
pub fn event_name(evt: &NormalizedEvent) -> &'static str {
    match evt {
        NormalizedEvent::StreamStart { .. } => "stream.start",
        NormalizedEvent::MessageDelta { .. } => "message.delta",
        NormalizedEvent::ToolCallDelta { .. } => "tool_call.delta",
        NormalizedEvent::ToolCallComplete { .. } => "tool_call.complete",
        NormalizedEvent::ToolResult { .. } => "tool_result",
        NormalizedEvent::Error { .. } => "error",
        NormalizedEvent::Done => "done",
    }
}
