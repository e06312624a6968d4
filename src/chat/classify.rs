//! Keyword gate deciding whether a chat turn is offered tools.
//!
//! A substring match over a fixed list. Requests that need a tool but use
//! none of these words are answered without tools.

/// Lower-case substrings that suggest a tool request.
pub const TOOL_KEYWORDS: &[&str] = &[
    // scheduling
    "schedule",
    "meeting",
    "calendar",
    "event",
    "appointment",
    "remind",
    "book",
    "tomorrow",
    "next week",
    // crm
    "crm",
    "contact",
    "deal",
    "pipeline",
    "lead",
    "customer",
    // meetings
    "zoom",
    "meet",
    "teams",
    "call",
    // messaging
    "slack",
    "message",
    "channel",
    "send",
    "post",
    "linkedin",
    // documents
    "document",
    "doc",
    "write up",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intent {
    pub use_tools: bool,
    pub matched: Vec<&'static str>,
}

pub fn classify(text: &str) -> Intent {
    let lower = text.to_lowercase();
    let matched: Vec<&'static str> = TOOL_KEYWORDS
        .iter()
        .copied()
        .filter(|keyword| lower.contains(keyword))
        .collect();

    Intent {
        use_tools: !matched.is_empty(),
        matched,
    }
}
