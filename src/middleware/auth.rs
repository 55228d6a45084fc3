use async_trait::async_trait;

use crate::errors::{AppError, AppResult};
use crate::models::UserId;

// Resolves an opaque token to the user it was issued for.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> AppResult<UserId>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn is_admin(&self, user_id: UserId) -> AppResult<bool>;
}

// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> AppResult<&str> {
    let header = header
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::Unauthenticated("bad header value given".into()))?;

    match header.split_once(' ') {
        Some(("Bearer", token)) if !token.is_empty() && !token.contains(' ') => Ok(token),
        _ => Err(AppError::Unauthenticated(
            "invalid formatted authorization header".into(),
        )),
    }
}

pub async fn require_auth(
    authenticator: &dyn Authenticator,
    header: Option<&str>,
) -> AppResult<UserId> {
    let token = bearer_token(header)?;

    match authenticator.authenticate(token).await {
        Ok(user_id) => Ok(user_id),
        Err(e) => {
            tracing::debug!("Rejected token: {}", e);
            Err(AppError::Unauthenticated("invalid token".into()))
        }
    }
}
