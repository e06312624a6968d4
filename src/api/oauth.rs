//! `/api/oauth/*`: connection status, connect and disconnect.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::State,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::auth::RequireUser;
use crate::error::{AppError, AppResult};
use crate::oauth::scopes::static_scopes;
use crate::oauth::{ConnectionStatus, SUPPORTED_PROVIDERS, get_connections};
use crate::server::AppState;

use super::extract::{ApiJson, ApiQuery};

#[derive(Debug, Deserialize)]
pub struct ConnectionsQuery {
    /// Comma-separated provider ids; all supported providers when absent.
    #[serde(default)]
    pub providers: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionsResponse {
    pub connections: BTreeMap<String, ConnectionStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub provider: String,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct DisconnectRequest {
    pub provider: String,
}

fn ensure_supported(provider: &str) -> AppResult<()> {
    if SUPPORTED_PROVIDERS.contains(&provider) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("unsupported provider: {provider}")))
    }
}

/// `GET /api/oauth/connections`
pub async fn connections(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    ApiQuery(query): ApiQuery<ConnectionsQuery>,
) -> AppResult<Json<ConnectionsResponse>> {
    let providers: Vec<String> = match query.providers.as_deref() {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(ToString::to_string)
            .collect(),
        None => SUPPORTED_PROVIDERS.iter().map(ToString::to_string).collect(),
    };
    for provider in &providers {
        ensure_supported(provider)?;
    }

    let connections = get_connections(&state.broker, &user.user_id, &providers).await;
    Ok(Json(ConnectionsResponse { connections }))
}

/// `POST /api/oauth/connect`
pub async fn connect(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    ApiJson(req): ApiJson<ConnectRequest>,
) -> AppResult<Json<ConnectResponse>> {
    ensure_supported(&req.provider)?;

    let scopes = req
        .scopes
        .filter(|s| !s.is_empty())
        .or_else(|| static_scopes(&req.provider, "connect"))
        .unwrap_or_default();
    let url = state.broker.connect_url(&user.user_id, &req.provider, &scopes);

    tracing::info!(user_id = %user.user_id, provider = %req.provider, "Connect flow started");
    Ok(Json(ConnectResponse { url }))
}

/// `POST /api/oauth/disconnect`
pub async fn disconnect(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    ApiJson(req): ApiJson<DisconnectRequest>,
) -> AppResult<Json<Value>> {
    ensure_supported(&req.provider)?;

    state
        .broker
        .disconnect(&user.user_id, &req.provider)
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    tracing::info!(user_id = %user.user_id, provider = %req.provider, "Provider disconnected");
    Ok(Json(json!({ "success": true, "provider": req.provider })))
}
