// In-process storage. Task creation holds the quota record's row lock for the
// whole insert-count-commit unit, so creations for one user serialize.
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::errors::StoreResult;
use crate::models::{NewTask, QuotaId, QuotaRecord, Task, TaskId, TaskStatus, User, UserId};
use crate::services::clock::DayWindow;
use crate::services::store::{
    sort_by_creation, CreateQuota, InsertTask, QuotaStore, TaskStore, UserStore,
};

struct QuotaRow {
    record: QuotaRecord,
    lock: Arc<Mutex<()>>,
}

#[derive(Default)]
struct QuotaTable {
    rows: HashMap<QuotaId, QuotaRow>,
    // Unique index on user_id
    by_user: HashMap<UserId, QuotaId>,
}

struct Session {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    quotas: RwLock<QuotaTable>,
    tasks: RwLock<BTreeMap<TaskId, Task>>,
    users: RwLock<HashMap<UserId, User>>,
    sessions: RwLock<HashMap<String, Session>>,
    next_quota_id: AtomicU64,
    next_task_id: AtomicU64,
}

impl Tables {
    fn allocate_quota_id(&self) -> QuotaId {
        self.next_quota_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn allocate_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Waits for any other transaction on the same record. None if the record does not exist.
    pub async fn begin(&self, quota_id: QuotaId) -> Option<MemoryTransaction> {
        let lock = {
            let quotas = self.tables.quotas.read().await;
            quotas.rows.get(&quota_id).map(|row| row.lock.clone())?
        };
        let row = lock.lock_owned().await;

        Some(MemoryTransaction {
            tables: self.tables.clone(),
            quota_id,
            _row: row,
            staged: Vec::new(),
            committed: false,
        })
    }

    // Full scan, not the unique index
    pub async fn quota_records_for(&self, user_id: UserId) -> usize {
        let quotas = self.tables.quotas.read().await;
        quotas
            .rows
            .values()
            .filter(|row| row.record.user_id == user_id)
            .count()
    }

    pub async fn task_count(&self) -> usize {
        self.tables.tasks.read().await.len()
    }
}

/// Unit of work on one quota record's task set. Inserted tasks are staged and
/// only become visible on commit; dropping the transaction discards them.
pub struct MemoryTransaction {
    tables: Arc<Tables>,
    quota_id: QuotaId,
    _row: OwnedMutexGuard<()>,
    staged: Vec<Task>,
    committed: bool,
}

impl MemoryTransaction {
    pub async fn daily_limit(&self) -> Option<u32> {
        let quotas = self.tables.quotas.read().await;
        quotas
            .rows
            .get(&self.quota_id)
            .map(|row| row.record.daily_limit)
    }

    pub fn insert(&mut self, task: NewTask) -> Task {
        let task = task.into_task(self.tables.allocate_task_id(), self.quota_id);
        self.staged.push(task.clone());
        task
    }

    // Committed plus staged
    pub async fn count_in(&self, window: DayWindow) -> u64 {
        let tasks = self.tables.tasks.read().await;
        let committed = tasks
            .values()
            .filter(|task| task.quota_id == self.quota_id && window.contains(task.created_at))
            .count();
        let staged = self
            .staged
            .iter()
            .filter(|task| window.contains(task.created_at))
            .count();
        (committed + staged) as u64
    }

    pub async fn commit(mut self) {
        let mut tasks = self.tables.tasks.write().await;
        for task in self.staged.drain(..) {
            tasks.insert(task.id, task);
        }
        self.committed = true;
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.committed && !self.staged.is_empty() {
            tracing::debug!(
                "Rolling back {} staged task(s) for quota record {}",
                self.staged.len(),
                self.quota_id
            );
        }
    }
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn quota_by_user(&self, user_id: UserId) -> StoreResult<Option<QuotaRecord>> {
        let quotas = self.tables.quotas.read().await;
        Ok(quotas
            .by_user
            .get(&user_id)
            .and_then(|id| quotas.rows.get(id))
            .map(|row| row.record.clone()))
    }

    async fn quota_by_id(&self, id: QuotaId) -> StoreResult<Option<QuotaRecord>> {
        let quotas = self.tables.quotas.read().await;
        Ok(quotas.rows.get(&id).map(|row| row.record.clone()))
    }

    async fn insert_quota(&self, user_id: UserId, daily_limit: u32) -> StoreResult<CreateQuota> {
        let mut quotas = self.tables.quotas.write().await;
        let QuotaTable { rows, by_user } = &mut *quotas;

        match by_user.entry(user_id) {
            std::collections::hash_map::Entry::Occupied(_) => Ok(CreateQuota::Conflict),
            std::collections::hash_map::Entry::Vacant(slot) => {
                let record = QuotaRecord {
                    id: self.tables.allocate_quota_id(),
                    user_id,
                    daily_limit,
                };
                slot.insert(record.id);
                rows.insert(
                    record.id,
                    QuotaRow {
                        record: record.clone(),
                        lock: Arc::new(Mutex::new(())),
                    },
                );
                Ok(CreateQuota::Created(record))
            }
        }
    }

    async fn update_daily_limit(
        &self,
        record: &QuotaRecord,
        daily_limit: u32,
    ) -> StoreResult<Option<QuotaRecord>> {
        let mut quotas = self.tables.quotas.write().await;
        Ok(quotas.rows.get_mut(&record.id).map(|row| {
            row.record.daily_limit = daily_limit;
            row.record.clone()
        }))
    }

    async fn count_tasks_in(&self, quota_id: QuotaId, window: DayWindow) -> StoreResult<u64> {
        let tasks = self.tables.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|task| task.quota_id == quota_id && window.contains(task.created_at))
            .count() as u64)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn task_by_id(&self, id: TaskId) -> StoreResult<Option<Task>> {
        Ok(self.tables.tasks.read().await.get(&id).cloned())
    }

    async fn tasks_for_quota(&self, quota_id: QuotaId) -> StoreResult<Vec<Task>> {
        let tasks = self.tables.tasks.read().await;
        let mut owned: Vec<Task> = tasks
            .values()
            .filter(|task| task.quota_id == quota_id)
            .cloned()
            .collect();
        sort_by_creation(&mut owned);
        Ok(owned)
    }

    async fn insert_task_within_limit(
        &self,
        quota: &QuotaRecord,
        task: NewTask,
        window: DayWindow,
    ) -> StoreResult<InsertTask> {
        let Some(mut tx) = self.begin(quota.id).await else {
            return Ok(InsertTask::MissingQuota);
        };
        let Some(daily_limit) = tx.daily_limit().await else {
            return Ok(InsertTask::MissingQuota);
        };

        let task = tx.insert(task);
        let created_today = tx.count_in(window).await;
        if created_today > u64::from(daily_limit) {
            // tx drops here and discards the staged task
            return Ok(InsertTask::LimitExceeded {
                created_today,
                daily_limit,
            });
        }

        tx.commit().await;
        Ok(InsertTask::Committed {
            task,
            created_today,
        })
    }

    async fn update_task(
        &self,
        task: &Task,
        name: &str,
        status: TaskStatus,
    ) -> StoreResult<Option<Task>> {
        let mut tasks = self.tables.tasks.write().await;
        Ok(tasks.get_mut(&task.id).map(|stored| {
            stored.name = name.to_string();
            stored.status = status;
            stored.clone()
        }))
    }

    async fn delete_task(&self, task: &Task) -> StoreResult<bool> {
        Ok(self.tables.tasks.write().await.remove(&task.id).is_some())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.tables.users.read().await.get(&id).cloned())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<bool> {
        let mut users = self.tables.users.write().await;
        if users.contains_key(&user.id) {
            return Ok(false);
        }
        users.insert(user.id, user.clone());
        Ok(true)
    }

    async fn save_session(&self, token: &str, user_id: UserId, ttl: Duration) -> StoreResult<()> {
        let now = Utc::now();
        let mut sessions = self.tables.sessions.write().await;
        sessions.retain(|_, session| session.expires_at > now);
        sessions.insert(
            token.to_string(),
            Session {
                user_id,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn session_user(&self, token: &str) -> StoreResult<Option<UserId>> {
        let mut sessions = self.tables.sessions.write().await;
        let entry = sessions
            .get(token)
            .map(|session| (session.user_id, session.expires_at));

        match entry {
            Some((user_id, expires_at)) if expires_at > Utc::now() => Ok(Some(user_id)),
            Some(_) => {
                sessions.remove(token);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete_session(&self, token: &str) -> StoreResult<()> {
        self.tables.sessions.write().await.remove(token);
        Ok(())
    }
}
