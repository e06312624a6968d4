use serde::{Deserialize, Serialize};

/// Session JWT payload issued by the identity provider.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserClaims {
    /// User id.
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    /// Expiry, seconds since the epoch.
    pub exp: usize,
}

/// The authenticated caller, attached to the request by the middleware.
#[derive(Clone, Debug)]
pub struct UserContext {
    pub user_id: String,
    pub claims: UserClaims,
}

impl From<UserClaims> for UserContext {
    fn from(claims: UserClaims) -> Self {
        Self {
            user_id: claims.sub.clone(),
            claims,
        }
    }
}
