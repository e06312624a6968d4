use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use crate::error::{AppError, AppResult};
use crate::server::AppState;

use super::claims::{UserClaims, UserContext};

/// Attach a [`UserContext`] when the request carries a valid bearer JWT.
///
/// Requests without a token pass through as anonymous unless
/// `security.jwt_required` is set. A token that fails validation is
/// always rejected.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> AppResult<Response> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        if state.config.security.jwt_required {
            return Err(AppError::Unauthorized);
        }
        return Ok(next.run(request).await);
    };

    let secret = &state.config.security.jwt_secret;
    if secret.is_empty() {
        tracing::warn!("Bearer token received but no JWT secret is configured");
        return Err(AppError::Unauthorized);
    }

    let key = DecodingKey::from_secret(secret.as_bytes());
    match decode::<UserClaims>(token, &key, &Validation::default()) {
        Ok(data) => {
            let context = UserContext::from(data.claims);
            tracing::debug!(user_id = %context.user_id, "Authenticated request");
            request.extensions_mut().insert(context);
            Ok(next.run(request).await)
        }
        Err(e) => {
            tracing::debug!(error = %e, "Rejected bearer token");
            Err(AppError::Unauthorized)
        }
    }
}
