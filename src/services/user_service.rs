use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;

use crate::config::{AdminConfig, SessionConfig};
use crate::errors::{AppError, AppResult};
use crate::middleware::{Authenticator, UserDirectory};
use crate::models::{Role, User, UserId};
use crate::services::store::UserStore;

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    session_ttl: Duration,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>, config: &SessionConfig) -> AppResult<Self> {
        let session_ttl = config
            .ttl()
            .map_err(|e| AppError::Internal(e.to_string()))?;

        Ok(Self { store, session_ttl })
    }

    pub async fn register(&self, user: User) -> AppResult<User> {
        if !self.store.insert_user(&user).await? {
            return Err(AppError::AlreadyExists(format!(
                "user {} already exists",
                user.id
            )));
        }

        tracing::info!("Registered user {} as {:?}", user.id, user.role);
        Ok(user)
    }

    pub async fn get_user(&self, user_id: UserId) -> AppResult<User> {
        self.store
            .user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {} not found", user_id)))
    }

    // Creates the configured admin account on first start. An existing account is left as is.
    pub async fn bootstrap_admin(&self, admin: &AdminConfig) -> AppResult<User> {
        let user = User {
            id: admin.user_id,
            email: admin.email.clone(),
            role: Role::Admin,
        };

        if self.store.insert_user(&user).await? {
            tracing::info!("Created admin account {}", user.id);
            return Ok(user);
        }

        let existing = self.get_user(admin.user_id).await?;
        if !existing.is_admin() {
            tracing::warn!(
                "Configured admin id {} belongs to a non-admin account",
                admin.user_id
            );
        }
        Ok(existing)
    }

    // Issues a session token for a user whose credentials were already checked.
    pub async fn open_session(&self, user_id: UserId) -> AppResult<String> {
        if self.store.user_by_id(user_id).await?.is_none() {
            return Err(AppError::Unauthenticated("invalid credentials".into()));
        }

        let token = uuid::Uuid::new_v4().to_string();
        self.store
            .save_session(&token, user_id, self.session_ttl)
            .await?;

        tracing::debug!("Opened session for user {}", user_id);
        Ok(token)
    }

    pub async fn close_session(&self, token: &str) -> AppResult<()> {
        self.store.delete_session(token).await?;
        Ok(())
    }
}

#[async_trait]
impl Authenticator for UserService {
    async fn authenticate(&self, token: &str) -> AppResult<UserId> {
        self.store
            .session_user(token)
            .await?
            .ok_or_else(|| AppError::Unauthenticated("invalid credentials".into()))
    }
}

#[async_trait]
impl UserDirectory for UserService {
    // Unknown users are simply not admins.
    async fn is_admin(&self, user_id: UserId) -> AppResult<bool> {
        Ok(self
            .store
            .user_by_id(user_id)
            .await?
            .map_or(false, |user| user.is_admin()))
    }
}
