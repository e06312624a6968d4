//! Session authentication.
//!
//! [`middleware::auth_middleware`] validates the bearer JWT and stores a
//! [`UserContext`] in the request extensions. Handlers read it back through
//! the [`CurrentUser`] and [`RequireUser`] extractors.

pub mod claims;
pub mod middleware;

pub use claims::{UserClaims, UserContext};
pub use middleware::auth_middleware;

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;

/// User id used for requests without a session.
pub const ANONYMOUS_USER: &str = "anonymous";

/// The caller, if a session is present.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Option<UserContext>);

impl CurrentUser {
    /// The session's user id, or [`ANONYMOUS_USER`].
    pub fn user_id(&self) -> &str {
        self.0.as_ref().map_or(ANONYMOUS_USER, |u| u.user_id.as_str())
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_none()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<UserContext>().cloned()))
    }
}

/// The caller; rejects with 401 when there is no session.
#[derive(Debug, Clone)]
pub struct RequireUser(pub UserContext);

impl<S: Send + Sync> FromRequestParts<S> for RequireUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserContext>()
            .cloned()
            .map(Self)
            .ok_or(AppError::Unauthorized)
    }
}
