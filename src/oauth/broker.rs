//! Client for the identity provider's outbound token exchange.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::analytics::{Analytics, TrackEvent};
use crate::config::BrokerConfig;

use super::scopes::ScopeResolver;
use super::token::{Token, TokenError, TokenErrorKind, TokenLookup};

const TOKEN_PATH: &str = "/v1/mgmt/outbound/app/user/token";
const DELETE_TOKENS_PATH: &str = "/v1/mgmt/outbound/app/user/tokens/delete";
const CONNECT_PATH: &str = "/v1/outbound/oauth/connect";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("token broker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token broker returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenOptions {
    pub with_refresh_token: bool,
    pub force_refresh: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenEnvelope {
    Wrapped { token: Token },
    Bare(Token),
}

impl From<TokenEnvelope> for Token {
    fn from(env: TokenEnvelope) -> Self {
        match env {
            TokenEnvelope::Wrapped { token } | TokenEnvelope::Bare(token) => token,
        }
    }
}

/// Fetches per-user provider tokens from the identity provider.
///
/// Every call goes to the network; tokens are never cached here.
#[derive(Debug, Clone)]
pub struct TokenBroker {
    http: reqwest::Client,
    config: BrokerConfig,
    resolver: Arc<ScopeResolver>,
    analytics: Arc<dyn Analytics>,
}

impl TokenBroker {
    pub fn new(
        config: BrokerConfig,
        resolver: Arc<ScopeResolver>,
        analytics: Arc<dyn Analytics>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            resolver,
            analytics,
        }
    }

    pub fn resolver(&self) -> &ScopeResolver {
        &self.resolver
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn bearer(&self) -> String {
        format!("{}:{}", self.config.project_id, self.config.management_key)
    }

    /// Exchange the user's stored connection for an access token.
    pub async fn get_oauth_token(
        &self,
        user_id: &str,
        provider: &str,
        operation: &str,
        options: TokenOptions,
    ) -> TokenLookup {
        let scopes = self.resolver.get_required_scopes(provider, operation).await;

        let mut body = json!({
            "appId": provider,
            "userId": user_id,
            "options": options,
        });
        if !scopes.is_empty() {
            body["scopes"] = json!(scopes);
        }

        tracing::debug!(user_id, provider, operation, ?scopes, "Requesting outbound token");

        let result = self
            .http
            .post(self.url(TOKEN_PATH))
            .bearer_auth(self.bearer())
            .json(&body)
            .send()
            .await;

        let lookup = match result {
            Ok(resp) => Self::map_response(resp, provider, &scopes).await,
            Err(e) => {
                tracing::warn!(provider, error = %e, "Token broker unreachable");
                TokenLookup::Unavailable
            }
        };

        self.track(user_id, provider, operation, &scopes, &lookup)
            .await;
        lookup
    }

    async fn map_response(resp: reqwest::Response, provider: &str, scopes: &[String]) -> TokenLookup {
        let status = resp.status();
        match status {
            StatusCode::NOT_FOUND => TokenLookup::Error(TokenError::new(
                TokenErrorKind::ConnectionRequired,
                provider,
                scopes.to_vec(),
            )),
            StatusCode::TOO_MANY_REQUESTS => TokenLookup::Error(TokenError::new(
                TokenErrorKind::RateLimited,
                provider,
                scopes.to_vec(),
            )),
            s if s.is_success() => match resp.json::<TokenEnvelope>().await {
                Ok(envelope) => {
                    let token = Token::from(envelope);
                    let missing = token.missing_scopes(scopes);
                    // An empty grant list means the broker did not report scopes.
                    if !token.scopes.is_empty() && !missing.is_empty() {
                        let mut err = TokenError::new(
                            TokenErrorKind::InsufficientScopes,
                            provider,
                            scopes.to_vec(),
                        );
                        err.current_scopes = Some(token.scopes.iter().cloned().collect());
                        TokenLookup::Error(err)
                    } else {
                        TokenLookup::Token(token)
                    }
                }
                Err(e) => {
                    tracing::warn!(provider, error = %e, "Unparseable token response");
                    TokenLookup::Unavailable
                }
            },
            s => {
                let body = resp.text().await.unwrap_or_default();
                tracing::warn!(provider, status = s.as_u16(), body = %body, "Token broker error");
                TokenLookup::Unavailable
            }
        }
    }

    async fn track(
        &self,
        user_id: &str,
        provider: &str,
        operation: &str,
        scopes: &[String],
        lookup: &TokenLookup,
    ) {
        let mut props = json!({
            "provider": provider,
            "operation": operation,
            "scopes": scopes,
            "success": lookup.token().is_some(),
        });
        match lookup {
            TokenLookup::Token(token) => {
                props["expiry"] = token
                    .expires_at()
                    .map_or(Value::Null, |t| Value::String(t.to_rfc3339()));
            }
            TokenLookup::Error(err) => props["error"] = json!(err.error.as_str()),
            TokenLookup::Unavailable => props["error"] = json!("unavailable"),
        }
        self.analytics
            .track(TrackEvent::new("oauth_token_request", user_id, props))
            .await;
    }

    /// Remove the user's stored tokens for a provider.
    pub async fn disconnect(&self, user_id: &str, provider: &str) -> Result<(), BrokerError> {
        let resp = self
            .http
            .post(self.url(DELETE_TOKENS_PATH))
            .bearer_auth(self.bearer())
            .json(&json!({ "appId": provider, "userId": user_id }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BrokerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        self.analytics
            .track(TrackEvent::new(
                "oauth_disconnect",
                user_id,
                json!({ "provider": provider }),
            ))
            .await;
        Ok(())
    }

    /// URL that starts the provider consent flow for a user.
    pub fn connect_url(&self, user_id: &str, provider: &str, scopes: &[String]) -> String {
        let mut url = match url::Url::parse(&self.url(CONNECT_PATH)) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid broker base URL");
                return format!("connection://{provider}");
            }
        };
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("projectId", &self.config.project_id)
                .append_pair("appId", provider)
                .append_pair("userId", user_id);
            if !scopes.is_empty() {
                query.append_pair("scopes", &scopes.join(" "));
            }
        }
        url.to_string()
    }
}
