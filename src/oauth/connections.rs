//! Per-provider connection status for the UI.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::broker::{TokenBroker, TokenOptions};
use super::token::{TokenErrorKind, TokenLookup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    NotConnected,
    InsufficientScopes,
    RateLimited,
    Error,
}

/// What the UI may know about a token. Never includes the token itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSummary {
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub status: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenSummary>,
}

impl From<&TokenLookup> for ConnectionStatus {
    fn from(lookup: &TokenLookup) -> Self {
        match lookup {
            TokenLookup::Token(token) => Self {
                connected: true,
                status: ConnectionState::Connected,
                token: Some(TokenSummary {
                    scopes: token.scopes.iter().cloned().collect(),
                    expires_at: token.expires_at(),
                    has_refresh_token: token.has_refresh_token,
                }),
            },
            TokenLookup::Error(err) => {
                let status = match err.error {
                    TokenErrorKind::ConnectionRequired => ConnectionState::NotConnected,
                    TokenErrorKind::InsufficientScopes => ConnectionState::InsufficientScopes,
                    TokenErrorKind::RateLimited => ConnectionState::RateLimited,
                };
                Self {
                    // A token with too few scopes is still a linked account.
                    connected: err.error == TokenErrorKind::InsufficientScopes,
                    status,
                    token: None,
                }
            }
            TokenLookup::Unavailable => Self {
                connected: false,
                status: ConnectionState::Error,
                token: None,
            },
        }
    }
}

/// Query the broker for each provider and collect the results.
pub async fn get_connections(
    broker: &TokenBroker,
    user_id: &str,
    providers: &[String],
) -> BTreeMap<String, ConnectionStatus> {
    let lookups = providers.iter().map(|provider| async move {
        let lookup = broker
            .get_oauth_token(user_id, provider, "connect", TokenOptions::default())
            .await;
        (provider.clone(), ConnectionStatus::from(&lookup))
    });

    futures::future::join_all(lookups).await.into_iter().collect()
}
