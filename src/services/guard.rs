use std::sync::Arc;

use crate::errors::{AppError, AppResult, ErrorKind};
use crate::middleware::UserDirectory;
use crate::models::{Task, TaskId, UserId};
use crate::services::quota::QuotaService;
use crate::services::store::TaskStore;

// Checks task ownership and admin rights before anything is read or changed.
#[derive(Clone)]
pub struct OwnershipGuard {
    tasks: Arc<dyn TaskStore>,
    quotas: QuotaService,
    users: Arc<dyn UserDirectory>,
}

impl OwnershipGuard {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        quotas: QuotaService,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            tasks,
            quotas,
            users,
        }
    }

    /// Loads the task if it belongs to `user_id`.
    ///
    /// A missing task is `TaskNotFound`, someone else's task is
    /// `TaskNotOwned`. Both render the same message to the caller.
    pub async fn authorize_task_access(&self, user_id: UserId, task_id: TaskId) -> AppResult<Task> {
        let task = self
            .tasks
            .task_by_id(task_id)
            .await?
            .ok_or(AppError::TaskNotFound(task_id))?;

        let owner = match self.quotas.get_by_id(task.quota_id).await {
            Ok(record) => record,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::error!(
                    "Task {} references missing quota record {}",
                    task_id,
                    task.quota_id
                );
                return Err(AppError::Internal(format!(
                    "task {} has no quota record",
                    task_id
                )));
            }
            Err(e) => return Err(e),
        };

        if owner.user_id != user_id {
            tracing::warn!(
                "User {} tried to access task {} owned by user {}",
                user_id,
                task_id,
                owner.user_id
            );
            return Err(AppError::TaskNotOwned(task_id));
        }

        Ok(task)
    }

    // Only admins may change a limit, their own or anyone else's.
    pub async fn authorize_quota_change(
        &self,
        caller: UserId,
        target: UserId,
        new_limit: u32,
    ) -> AppResult<()> {
        if !self.users.is_admin(caller).await? {
            tracing::warn!(
                "Non-admin user {} tried to set the limit of user {} to {}",
                caller,
                target,
                new_limit
            );
            return Err(AppError::PermissionDenied(
                "only admin can update task limit".into(),
            ));
        }

        Ok(())
    }
}
