// Storage traits, implemented by RedisService and MemoryStore.
use async_trait::async_trait;
use chrono::Duration;

use crate::errors::StoreResult;
use crate::models::{NewTask, QuotaId, QuotaRecord, Task, TaskId, TaskStatus, User, UserId};
use crate::services::clock::DayWindow;

// Conflict means the user already has a record. Two racing inserts for one user
// produce exactly one Created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateQuota {
    Created(QuotaRecord),
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertTask {
    Committed { task: Task, created_today: u64 },
    // Nothing was persisted
    LimitExceeded { created_today: u64, daily_limit: u32 },
    MissingQuota,
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn quota_by_user(&self, user_id: UserId) -> StoreResult<Option<QuotaRecord>>;

    async fn quota_by_id(&self, id: QuotaId) -> StoreResult<Option<QuotaRecord>>;

    async fn insert_quota(&self, user_id: UserId, daily_limit: u32) -> StoreResult<CreateQuota>;

    async fn update_daily_limit(
        &self,
        record: &QuotaRecord,
        daily_limit: u32,
    ) -> StoreResult<Option<QuotaRecord>>;

    async fn count_tasks_in(&self, quota_id: QuotaId, window: DayWindow) -> StoreResult<u64>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn task_by_id(&self, id: TaskId) -> StoreResult<Option<Task>>;

    // Oldest first, ties broken by id
    async fn tasks_for_quota(&self, quota_id: QuotaId) -> StoreResult<Vec<Task>>;

    /// Inserts `task` for `quota`, counts the record's tasks inside `window`
    /// with the new task included, and commits only if the count does not
    /// exceed the record's `daily_limit`. The limit is read inside the unit.
    ///
    /// All of this must happen as one atomic unit that serializes with other
    /// calls for the same quota record. A backend that cannot serialize them
    /// may overshoot the limit by up to the number of concurrent committers
    /// minus one; both backends in this crate serialize.
    async fn insert_task_within_limit(
        &self,
        quota: &QuotaRecord,
        task: NewTask,
        window: DayWindow,
    ) -> StoreResult<InsertTask>;

    // None if the task no longer exists
    async fn update_task(
        &self,
        task: &Task,
        name: &str,
        status: TaskStatus,
    ) -> StoreResult<Option<Task>>;

    async fn delete_task(&self, task: &Task) -> StoreResult<bool>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_by_id(&self, id: UserId) -> StoreResult<Option<User>>;

    // false if a user with the same id exists
    async fn insert_user(&self, user: &User) -> StoreResult<bool>;

    async fn save_session(&self, token: &str, user_id: UserId, ttl: Duration) -> StoreResult<()>;

    async fn session_user(&self, token: &str) -> StoreResult<Option<UserId>>;

    async fn delete_session(&self, token: &str) -> StoreResult<()>;
}

pub(crate) fn sort_by_creation(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}
