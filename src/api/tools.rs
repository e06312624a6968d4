use axum::{
    Json,
    extract::State,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::auth::RequireUser;
use crate::server::AppState;

use super::extract::ApiQuery;

#[derive(Debug, Deserialize)]
pub struct ToolsQuery {
    #[serde(default)]
    pub capability: Option<String>,
}

/// `GET /api/tools[?capability=]`
pub async fn list_tools(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ToolsQuery>,
) -> Json<Value> {
    let tools = match query.capability.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(keyword) => state.registry.find_by_capability(keyword.trim()),
        None => state.registry.get_all_tools(),
    };
    Json(json!({ "tools": tools }))
}

/// `GET /api/tools/history`: the caller's recent tool executions.
pub async fn history(State(state): State<AppState>, RequireUser(user): RequireUser) -> Json<Value> {
    let actions = state.registry.history().recent(&user.user_id);
    Json(json!({ "actions": actions }))
}
