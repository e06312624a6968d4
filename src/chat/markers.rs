//! `<connection:{json}>` markers embedded in saved assistant messages.
//!
//! The front-end renders each marker as a connect button.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::oauth::SUPPORTED_PROVIDERS;
use crate::tools::{ToolResponse, UiKind, provider_display_name};

/// Substrings (lower-case) that mean the assistant asked the user to reconnect.
pub const RECONNECT_PHRASES: &[&str] = &[
    "connect your",
    "reconnect",
    "connection required",
    "not connected",
    "please connect",
    "authorize access",
    "grant access",
    "insufficient permissions",
];

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<connection:(\{[^\n]*?\})>").expect("valid marker regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMarker {
    pub service: String,
    #[serde(default)]
    pub required_scopes: Vec<String>,
}

impl ConnectionMarker {
    fn render(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("<connection:{json}>")
    }
}

pub fn needs_reconnection(text: &str) -> bool {
    let lower = text.to_lowercase();
    RECONNECT_PHRASES.iter().any(|p| lower.contains(p))
}

/// Markers for a finished assistant turn.
///
/// Tool results that asked for a connection win; otherwise a reconnection
/// phrase in the text yields markers for every provider it names.
pub fn detect_markers(text: &str, tool_results: &[ToolResponse]) -> Vec<ConnectionMarker> {
    let mut markers: Vec<ConnectionMarker> = Vec::new();

    for ui in tool_results.iter().filter_map(|r| r.ui.as_ref()) {
        if !matches!(ui.kind, UiKind::ConnectionRequired | UiKind::InsufficientScopes) {
            continue;
        }
        if markers.iter().any(|m| m.service == ui.service) {
            continue;
        }
        markers.push(ConnectionMarker {
            service: ui.service.clone(),
            required_scopes: ui.required_scopes.clone().unwrap_or_default(),
        });
    }

    if markers.is_empty() && needs_reconnection(text) {
        let lower = text.to_lowercase();
        markers.extend(
            SUPPORTED_PROVIDERS
                .iter()
                .filter(|p| lower.contains(&provider_display_name(p).to_lowercase()))
                .map(|p| ConnectionMarker {
                    service: (*p).to_string(),
                    required_scopes: Vec::new(),
                }),
        );
    }

    markers
}

/// Append markers not already present in `text`.
pub fn append_markers(text: &str, markers: &[ConnectionMarker]) -> String {
    let existing = parse_markers(text);
    let mut out = text.to_string();
    for marker in markers {
        if existing.iter().any(|m| m.service == marker.service) {
            continue;
        }
        out.push('\n');
        out.push_str(&marker.render());
    }
    out
}

pub fn parse_markers(text: &str) -> Vec<ConnectionMarker> {
    MARKER_RE
        .captures_iter(text)
        .filter_map(|c| serde_json::from_str(&c[1]).ok())
        .collect()
}
