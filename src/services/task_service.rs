use std::sync::Arc;

use crate::config::QuotaConfig;
use crate::errors::{AppError, AppResult};
use crate::middleware::UserDirectory;
use crate::models::{NewTask, Task, TaskId, TaskStatus, UserId};
use crate::services::clock::Clock;
use crate::services::guard::OwnershipGuard;
use crate::services::quota::QuotaService;
use crate::services::store::{InsertTask, QuotaStore, TaskStore};

/// Task operations exposed to the delivery layer.
#[derive(Clone)]
pub struct TaskService {
    tasks: Arc<dyn TaskStore>,
    quotas: QuotaService,
    guard: OwnershipGuard,
    clock: Arc<dyn Clock>,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        quotas: QuotaService,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = OwnershipGuard::new(tasks.clone(), quotas.clone(), users);
        Self {
            tasks,
            quotas,
            guard,
            clock,
        }
    }

    /// Wires every component to a single backend.
    pub fn with_store<S>(
        store: S,
        users: Arc<dyn UserDirectory>,
        config: &QuotaConfig,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self>
    where
        S: QuotaStore + TaskStore + Clone + 'static,
    {
        let quotas = QuotaService::new(Arc::new(store.clone()), config, clock.clone())?;
        Ok(Self::new(Arc::new(store), quotas, users, clock))
    }

    pub fn quotas(&self) -> &QuotaService {
        &self.quotas
    }

    pub async fn fetch_tasks(&self, user_id: UserId) -> AppResult<Vec<Task>> {
        let quota = self.quotas.ensure_exists(user_id).await?;
        let tasks = self.tasks.tasks_for_quota(quota.id).await?;

        tracing::debug!("Fetched {} task(s) for user {}", tasks.len(), user_id);
        Ok(tasks)
    }

    pub async fn get_task(&self, user_id: UserId, task_id: TaskId) -> AppResult<Task> {
        self.guard.authorize_task_access(user_id, task_id).await
    }

    /// Creates a task unless the user already reached today's limit.
    ///
    /// The insert and the count run as one atomic unit in the store, with
    /// the new task counted. Over the limit, nothing is persisted and the
    /// caller gets `ResourceExhausted`.
    pub async fn create_task(
        &self,
        user_id: UserId,
        name: &str,
        status: TaskStatus,
    ) -> AppResult<Task> {
        validate_name(name)?;

        let quota = self.quotas.ensure_exists(user_id).await?;
        let now = self.clock.now();
        let draft = NewTask {
            name: name.to_string(),
            status,
            created_at: now,
        };

        match self
            .tasks
            .insert_task_within_limit(&quota, draft, self.quotas.day_window(now))
            .await?
        {
            InsertTask::Committed {
                task,
                created_today,
            } => {
                tracing::info!(
                    "Created task {} for user {} ({} today)",
                    task.id,
                    user_id,
                    created_today
                );
                Ok(task)
            }
            InsertTask::LimitExceeded {
                created_today,
                daily_limit,
            } => {
                tracing::info!(
                    "User {} hit the daily limit of {} (attempt {} today)",
                    user_id,
                    daily_limit,
                    created_today
                );
                Err(AppError::task_limit_exceeded())
            }
            InsertTask::MissingQuota => {
                tracing::error!("Quota record {} vanished during task creation", quota.id);
                Err(AppError::Internal(format!(
                    "quota record for user {} is missing",
                    user_id
                )))
            }
        }
    }

    pub async fn update_task(
        &self,
        user_id: UserId,
        task_id: TaskId,
        name: &str,
        status: TaskStatus,
    ) -> AppResult<Task> {
        validate_name(name)?;

        let task = self.guard.authorize_task_access(user_id, task_id).await?;
        let updated = self
            .tasks
            .update_task(&task, name, status)
            .await?
            .ok_or(AppError::TaskNotFound(task_id))?;

        tracing::info!("Updated task {} for user {}", task_id, user_id);
        Ok(updated)
    }

    /// Deleting a task that does not exist succeeds.
    pub async fn delete_task(&self, user_id: UserId, task_id: TaskId) -> AppResult<()> {
        let task = match self.guard.authorize_task_access(user_id, task_id).await {
            Ok(task) => task,
            Err(AppError::TaskNotFound(_)) => {
                tracing::debug!("Task {} already absent", task_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if self.tasks.delete_task(&task).await? {
            tracing::info!("Deleted task {} for user {}", task_id, user_id);
        }
        Ok(())
    }

    pub async fn set_user_task_limit(
        &self,
        caller: UserId,
        target: UserId,
        new_limit: u32,
    ) -> AppResult<()> {
        self.guard
            .authorize_quota_change(caller, target, new_limit)
            .await?;
        self.quotas.set_limit(target, new_limit).await?;
        Ok(())
    }
}

fn validate_name(name: &str) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::InvalidArgument("task name is required".into()));
    }
    Ok(())
}
