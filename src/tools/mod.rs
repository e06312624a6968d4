//! Tool abstraction shared by every third-party integration.
//!
//! A tool validates its JSON input, obtains a provider token through the
//! [`TokenBroker`], calls the provider's REST API and reports back with a
//! [`ToolResponse`]. Failures travel as [`ToolError`] until the registry
//! turns them into a response, so an auth problem and a provider outage stay
//! distinguishable all the way to the UI.

pub mod calendar;
pub mod crm;
pub mod docs;
pub mod history;
pub mod linkedin;
pub mod meet;
pub mod registry;
pub mod slack;
pub mod teams;
pub mod zoom;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::auth::ANONYMOUS_USER;
use crate::config::ProviderEndpoints;
use crate::oauth::scopes::static_scopes;
use crate::oauth::{Token, TokenBroker, TokenError, TokenErrorKind, TokenLookup, TokenOptions};

pub use history::{ToolAction, ToolHistory};
pub use registry::ToolRegistry;

/// The closed set of tools the assistant can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    GoogleCalendar,
    CrmContacts,
    CrmDeals,
    Zoom,
    GoogleMeet,
    Slack,
    Linkedin,
    MicrosoftTeams,
    GoogleDocs,
}

impl ToolId {
    pub const ALL: [ToolId; 9] = [
        ToolId::GoogleCalendar,
        ToolId::CrmContacts,
        ToolId::CrmDeals,
        ToolId::Zoom,
        ToolId::GoogleMeet,
        ToolId::Slack,
        ToolId::Linkedin,
        ToolId::MicrosoftTeams,
        ToolId::GoogleDocs,
    ];

    /// Name exposed to the LLM as the function name.
    pub fn as_str(self) -> &'static str {
        match self {
            ToolId::GoogleCalendar => "google_calendar",
            ToolId::CrmContacts => "crm_contacts",
            ToolId::CrmDeals => "crm_deals",
            ToolId::Zoom => "zoom",
            ToolId::GoogleMeet => "google_meet",
            ToolId::Slack => "slack",
            ToolId::Linkedin => "linkedin",
            ToolId::MicrosoftTeams => "microsoft_teams",
            ToolId::GoogleDocs => "google_docs",
        }
    }

    /// Identity-provider app id the tool's token comes from.
    pub fn provider(self) -> &'static str {
        match self {
            ToolId::GoogleCalendar => "google-calendar",
            ToolId::CrmContacts | ToolId::CrmDeals => "custom-crm",
            ToolId::Zoom => "zoom",
            ToolId::GoogleMeet => "google-meet",
            ToolId::Slack => "slack",
            ToolId::Linkedin => "linkedin",
            ToolId::MicrosoftTeams => "microsoft-teams",
            ToolId::GoogleDocs => "google-docs",
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tool: {0}")]
pub struct UnknownTool(pub String);

impl FromStr for ToolId {
    type Err = UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownTool(s.to_string()))
    }
}

/// Human-readable provider name for chat messages.
pub fn provider_display_name(provider: &str) -> &str {
    match provider {
        "google-calendar" => "Google Calendar",
        "google-docs" => "Google Docs",
        "google-meet" => "Google Meet",
        "zoom" => "Zoom",
        "custom-crm" => "CRM",
        "slack" => "Slack",
        "linkedin" => "LinkedIn",
        "microsoft-teams" => "Microsoft Teams",
        other => other,
    }
}

/// Static description of a tool, fixed at registration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub id: ToolId,
    pub name: String,
    pub description: String,
    pub scopes: BTreeSet<String>,
    pub required_fields: Vec<String>,
    pub optional_fields: Vec<String>,
    pub capabilities: Vec<String>,
    /// JSON schema for the LLM function definition.
    #[serde(skip)]
    pub parameters: Value,
}

impl ToolConfig {
    pub fn new(id: ToolId, name: &str, description: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            scopes: static_scopes(id.provider(), "connect")
                .unwrap_or_default()
                .into_iter()
                .collect(),
            required_fields: Vec::new(),
            optional_fields: Vec::new(),
            capabilities: Vec::new(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    #[must_use]
    pub fn required(mut self, fields: &[&str]) -> Self {
        self.required_fields = owned(fields);
        self
    }

    #[must_use]
    pub fn optional(mut self, fields: &[&str]) -> Self {
        self.optional_fields = owned(fields);
        self
    }

    #[must_use]
    pub fn capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = owned(capabilities);
        self
    }

    #[must_use]
    pub fn parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeedsInput {
    pub field: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiKind {
    ConnectionRequired,
    InsufficientScopes,
    RateLimited,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectButton {
    pub text: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiHint {
    #[serde(rename = "type")]
    pub kind: UiKind,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_button: Option<ConnectButton>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_scopes: Option<Vec<String>>,
}

/// Uniform result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_input: Option<NeedsInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiHint>,
}

impl ToolResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            needs_input: None,
            ui: None,
        }
    }

    pub fn needs_input(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            data: None,
            error: Some(message.clone()),
            needs_input: Some(NeedsInput {
                field: field.to_string(),
                message,
                options: None,
            }),
            ui: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: &[&str]) -> Self {
        if let Some(needs) = self.needs_input.as_mut() {
            needs.options = Some(owned(options));
        }
        self
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            needs_input: None,
            ui: None,
        }
    }

    /// Failure with a UI hint but no connect button.
    pub fn service_error(kind: UiKind, service: &str, message: impl Into<String>) -> Self {
        Self {
            ui: Some(UiHint {
                kind,
                service: service.to_string(),
                connect_button: None,
                required_scopes: None,
            }),
            ..Self::error(message)
        }
    }

    /// Ask the user to connect (or reconnect) a provider. Never carries data.
    pub fn create_connection_request(provider: &str, scopes: &[String], message: &str) -> Self {
        Self::connection_prompt(UiKind::ConnectionRequired, provider, scopes, message)
    }

    fn connection_prompt(kind: UiKind, provider: &str, scopes: &[String], message: &str) -> Self {
        let verb = if kind == UiKind::InsufficientScopes {
            "Reconnect"
        } else {
            "Connect"
        };
        Self {
            ui: Some(UiHint {
                kind,
                service: provider.to_string(),
                connect_button: Some(ConnectButton {
                    text: format!("{verb} {}", provider_display_name(provider)),
                    action: format!("connection://{provider}"),
                }),
                required_scopes: (!scopes.is_empty()).then(|| scopes.to_vec()),
            }),
            ..Self::error(message)
        }
    }

    /// The chat-facing text of this response.
    pub fn message(&self) -> String {
        if let Some(msg) = self
            .data
            .as_ref()
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
        {
            return msg.to_string();
        }
        if let Some(needs) = &self.needs_input {
            return needs.message.clone();
        }
        self.error.clone().unwrap_or_default()
    }

    pub fn ui_kind(&self) -> Option<UiKind> {
        self.ui.as_ref().map(|ui| ui.kind)
    }
}

/// Why a tool could not complete.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{provider} is not connected")]
    ConnectionRequired {
        provider: String,
        required_scopes: Vec<String>,
    },

    #[error("{provider} connection lacks required permissions")]
    InsufficientScopes {
        provider: String,
        required_scopes: Vec<String>,
        current_scopes: Vec<String>,
    },

    #[error("{provider} rate limit reached")]
    RateLimited { provider: String },

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{service} request failed: {message}")]
    Provider { service: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ToolError {
    pub fn provider(service: &str, message: impl Into<String>) -> Self {
        Self::Provider {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Turn the error into what the user sees. Only auth failures ask for a
    /// reconnect.
    pub fn into_response(self, provider: &str) -> ToolResponse {
        let name = provider_display_name(provider);
        match self {
            ToolError::ConnectionRequired {
                provider,
                required_scopes,
            } => ToolResponse::create_connection_request(
                &provider,
                &required_scopes,
                &format!(
                    "Please connect your {} account to continue.",
                    provider_display_name(&provider)
                ),
            ),
            ToolError::InsufficientScopes {
                provider,
                required_scopes,
                ..
            } => ToolResponse::connection_prompt(
                UiKind::InsufficientScopes,
                &provider,
                &required_scopes,
                &format!(
                    "Your {} connection needs additional permissions. Please reconnect it.",
                    provider_display_name(&provider)
                ),
            ),
            ToolError::RateLimited { provider } => ToolResponse::service_error(
                UiKind::RateLimited,
                &provider,
                format!(
                    "{} is receiving too many requests. Please try again in a moment.",
                    provider_display_name(&provider)
                ),
            ),
            ToolError::Validation { field, message } => ToolResponse::needs_input(&field, message),
            ToolError::Provider { service, message } => ToolResponse::service_error(
                UiKind::Error,
                &service,
                format!("{} returned an error: {message}", provider_display_name(&service)),
            ),
            ToolError::Http(e) => ToolResponse::service_error(
                UiKind::Error,
                provider,
                format!("Could not reach {name}: {e}"),
            ),
        }
    }
}

impl From<TokenError> for ToolError {
    fn from(err: TokenError) -> Self {
        match err.error {
            TokenErrorKind::ConnectionRequired => ToolError::ConnectionRequired {
                provider: err.provider,
                required_scopes: err.required_scopes,
            },
            TokenErrorKind::InsufficientScopes => ToolError::InsufficientScopes {
                provider: err.provider,
                required_scopes: err.required_scopes,
                current_scopes: err.current_scopes.unwrap_or_default(),
            },
            TokenErrorKind::RateLimited => ToolError::RateLimited {
                provider: err.provider,
            },
        }
    }
}

/// Shared dependencies handed to every tool at construction.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub broker: Arc<TokenBroker>,
    pub http: reqwest::Client,
    pub endpoints: ProviderEndpoints,
}

impl ToolContext {
    pub fn new(broker: Arc<TokenBroker>, endpoints: ProviderEndpoints) -> Self {
        Self {
            broker,
            http: reqwest::Client::new(),
            endpoints,
        }
    }

    /// Resolve a fresh provider token for this call.
    pub async fn token(
        &self,
        user_id: &str,
        provider: &str,
        operation: &str,
    ) -> Result<Token, ToolError> {
        if user_id == ANONYMOUS_USER {
            return Err(self.connection_required(provider, operation).await);
        }
        match self
            .broker
            .get_oauth_token(user_id, provider, operation, TokenOptions::default())
            .await
        {
            TokenLookup::Token(token) => Ok(token),
            TokenLookup::Error(err) => Err(err.into()),
            TokenLookup::Unavailable => Err(self.connection_required(provider, operation).await),
        }
    }

    async fn connection_required(&self, provider: &str, operation: &str) -> ToolError {
        ToolError::ConnectionRequired {
            provider: provider.to_string(),
            required_scopes: self
                .broker
                .resolver()
                .get_required_scopes(provider, operation)
                .await,
        }
    }

    /// Send a provider request and decode its JSON body.
    ///
    /// 401 and 403 become auth errors; any other non-2xx is a provider error.
    pub async fn send_json(
        &self,
        request: RequestBuilder,
        provider: &str,
        operation: &str,
    ) -> Result<Value, ToolError> {
        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        match status {
            s if s.is_success() => {
                if body.trim().is_empty() {
                    Ok(Value::Null)
                } else {
                    serde_json::from_str(&body).map_err(|e| {
                        ToolError::provider(provider, format!("unexpected response: {e}"))
                    })
                }
            }
            StatusCode::UNAUTHORIZED => Err(self.connection_required(provider, operation).await),
            StatusCode::FORBIDDEN => Err(ToolError::InsufficientScopes {
                provider: provider.to_string(),
                required_scopes: self
                    .broker
                    .resolver()
                    .get_required_scopes(provider, operation)
                    .await,
                current_scopes: Vec::new(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(ToolError::RateLimited {
                provider: provider.to_string(),
            }),
            s => {
                tracing::warn!(provider, status = s.as_u16(), body = %body, "Provider request failed");
                Err(ToolError::provider(
                    provider,
                    provider_error_message(&body).unwrap_or_else(|| format!("HTTP {}", s.as_u16())),
                ))
            }
        }
    }
}

/// Pull a readable message out of the common provider error envelopes.
fn provider_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let candidates = [
        value.pointer("/error/message"),
        value.get("message"),
        value.get("error_description"),
        value.get("error"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
pub trait Tool: Send + Sync + fmt::Debug {
    fn config(&self) -> &ToolConfig;

    /// `None` when the input is acceptable.
    fn validate(&self, input: &Value) -> Option<ToolResponse>;

    async fn execute(&self, user_id: &str, input: Value) -> Result<ToolResponse, ToolError>;
}

// Input helpers

/// Non-empty trimmed string field.
pub(crate) fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub(crate) fn action<'a>(input: &'a Value, default: &'a str) -> &'a str {
    str_field(input, "action").unwrap_or(default)
}

/// First missing required field as a `needsInput` response.
pub(crate) fn missing_field(input: &Value, fields: &[(&str, &str)]) -> Option<ToolResponse> {
    fields
        .iter()
        .find(|(field, _)| str_field(input, field).is_none())
        .map(|(field, message)| ToolResponse::needs_input(field, *message))
}

pub(crate) fn unknown_action(action: &str, supported: &[&str]) -> ToolResponse {
    ToolResponse::needs_input(
        "action",
        format!("Unsupported action '{action}'. Choose one of: {}", supported.join(", ")),
    )
    .with_options(supported)
}

/// Accepts a JSON array of strings or a comma-separated string.
pub(crate) fn string_list(input: &Value, key: &str) -> Vec<String> {
    match input.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split([',', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Meeting length in minutes from a number or a phrase like "1 hour".
pub(crate) fn duration_field(input: &Value, key: &str) -> i64 {
    match input.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .filter(|m| *m > 0)
            .map_or(30, |m| m.min(24 * 60)),
        Some(Value::String(s)) => crate::dates::parse_duration_minutes(s),
        _ => 30,
    }
}

pub(crate) fn limit_field(input: &Value, default: u64) -> u64 {
    input
        .get("limit")
        .and_then(Value::as_u64)
        .map_or(default, |l| l.clamp(1, 100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_ids_round_trip_names() {
        for id in ToolId::ALL {
            assert_eq!(id.as_str().parse::<ToolId>().unwrap(), id);
            assert_eq!(
                serde_json::to_value(id).unwrap(),
                Value::String(id.as_str().to_string())
            );
        }
        assert!("fax_machine".parse::<ToolId>().is_err());
        assert_eq!(ToolId::CrmDeals.provider(), "custom-crm");
    }

    #[test]
    fn connection_request_shape() {
        let resp = ToolResponse::create_connection_request(
            "zoom",
            &["meeting:write".to_string()],
            "Please connect Zoom",
        );
        assert!(!resp.success);
        assert!(resp.data.is_none());
        let ui = resp.ui.as_ref().unwrap();
        assert_eq!(ui.kind, UiKind::ConnectionRequired);
        assert_eq!(ui.connect_button.as_ref().unwrap().action, "connection://zoom");

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["ui"]["type"], "connection_required");
        assert_eq!(json["ui"]["connectButton"]["action"], "connection://zoom");
        assert_eq!(json["ui"]["requiredScopes"][0], "meeting:write");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn only_auth_errors_prompt_for_connection() {
        let auth = ToolError::from(TokenError::new(
            TokenErrorKind::ConnectionRequired,
            "slack",
            vec!["chat:write".into()],
        ))
        .into_response("slack");
        assert_eq!(auth.ui_kind(), Some(UiKind::ConnectionRequired));

        let scopes = ToolError::from(TokenError::new(
            TokenErrorKind::InsufficientScopes,
            "slack",
            vec!["chat:write".into()],
        ))
        .into_response("slack");
        assert_eq!(scopes.ui_kind(), Some(UiKind::InsufficientScopes));

        let provider = ToolError::provider("slack", "channel_not_found").into_response("slack");
        assert_eq!(provider.ui_kind(), Some(UiKind::Error));
        assert!(provider.ui.unwrap().connect_button.is_none());

        let invalid = ToolError::validation("email", "bad address").into_response("custom-crm");
        assert!(invalid.ui.is_none());
        assert_eq!(invalid.needs_input.unwrap().field, "email");
    }

    #[test]
    fn input_helpers() {
        let input = json!({
            "title": "  Sync ",
            "blank": "   ",
            "attendees": "a@x.com, b@y.com",
            "tags": ["one", "", "two"],
            "duration": 45,
            "length": "1 hour",
        });
        assert_eq!(str_field(&input, "title"), Some("Sync"));
        assert_eq!(str_field(&input, "blank"), None);
        assert_eq!(string_list(&input, "attendees"), vec!["a@x.com", "b@y.com"]);
        assert_eq!(string_list(&input, "tags"), vec!["one", "two"]);
        assert_eq!(duration_field(&input, "duration"), 45);
        assert_eq!(duration_field(&input, "length"), 60);
        assert_eq!(duration_field(&input, "missing"), 30);

        let missing = missing_field(&input, &[("title", "t?"), ("date", "When?")]).unwrap();
        assert_eq!(missing.needs_input.unwrap().field, "date");
    }

    #[test]
    fn provider_error_message_variants() {
        assert_eq!(
            provider_error_message(r#"{"error":{"message":"bad"}}"#).as_deref(),
            Some("bad")
        );
        assert_eq!(
            provider_error_message(r#"{"message":"nope"}"#).as_deref(),
            Some("nope")
        );
        assert_eq!(provider_error_message("<html>").as_deref(), None);
    }
}
