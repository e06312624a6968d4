//! Token data model returned by the identity provider's token exchange.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::scopes::grant_covers;

/// An outbound OAuth token for one user and one provider.
///
/// Short-lived and request-scoped: tokens are fetched per tool call and
/// never cached or persisted.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub user_id: String,
    pub access_token: String,
    #[serde(default)]
    pub access_token_type: String,
    /// Expiry as unix seconds; 0 when the broker did not report one.
    #[serde(default, deserialize_with = "unix_seconds")]
    pub access_token_expiry: i64,
    #[serde(default)]
    pub has_refresh_token: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.id)
            .field("app_id", &self.app_id)
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .field("access_token_expiry", &self.access_token_expiry)
            .field("has_refresh_token", &self.has_refresh_token)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl Token {
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.access_token_expiry <= 0 {
            return None;
        }
        Utc.timestamp_opt(self.access_token_expiry, 0).single()
    }

    /// Scopes from `required` that no grant on this token covers.
    #[must_use]
    pub fn missing_scopes(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|s| !self.scopes.iter().any(|g| grant_covers(g, s)))
            .cloned()
            .collect()
    }
}

/// The broker reports expiry either as a number or as a numeric string.
fn unix_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Int(v) => v,
        #[allow(clippy::cast_possible_truncation)]
        Raw::Float(v) => v as i64,
        Raw::Text(s) => s.trim().parse().unwrap_or_default(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenErrorKind {
    /// The user has never linked this provider.
    ConnectionRequired,
    /// A token exists but lacks a required permission.
    InsufficientScopes,
    /// The broker answered 429.
    RateLimited,
}

impl TokenErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionRequired => "connection_required",
            Self::InsufficientScopes => "insufficient_scopes",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// Returned in place of a token when the broker cannot satisfy the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenError {
    pub error: TokenErrorKind,
    pub provider: String,
    pub required_scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_scopes: Option<Vec<String>>,
}

impl TokenError {
    pub fn new(kind: TokenErrorKind, provider: impl Into<String>, required: Vec<String>) -> Self {
        Self {
            error: kind,
            provider: provider.into(),
            required_scopes: required,
            current_scopes: None,
        }
    }
}

/// Outcome of a token lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenLookup {
    Token(Token),
    Error(TokenError),
    /// The broker failed for a reason the caller cannot act on.
    Unavailable,
}

impl TokenLookup {
    #[must_use]
    pub fn token(&self) -> Option<&Token> {
        match self {
            Self::Token(t) => Some(t),
            _ => None,
        }
    }
}
