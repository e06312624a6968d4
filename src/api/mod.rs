//! HTTP handlers.

pub mod chat;
pub mod extract;
pub mod oauth;
pub mod sse;
pub mod tools;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::auth_middleware;
use crate::server::AppState;

/// Every `/api` route, behind the session middleware.
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/chat",
            post(chat::post_chat)
                .get(chat::export_chat)
                .delete(chat::delete_chat),
        )
        .route("/api/oauth/connections", get(oauth::connections))
        .route("/api/oauth/connect", post(oauth::connect))
        .route("/api/oauth/disconnect", post(oauth::disconnect))
        .route("/api/tools", get(tools::list_tools))
        .route("/api/tools/history", get(tools::history))
        .layer(middleware::from_fn_with_state(state, auth_middleware))
}
