// Redis storage. Anything that must be atomic runs as a Lua script, which Redis
// executes without interleaving other commands.
use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Duration;
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};

use crate::config::RedisConfig;
use crate::errors::{StoreError, StoreResult};
use crate::models::{NewTask, QuotaId, QuotaRecord, Task, TaskId, TaskStatus, User, UserId};
use crate::services::clock::DayWindow;
use crate::services::store::{
    sort_by_creation, CreateQuota, InsertTask, QuotaStore, TaskStore, UserStore,
};

const QUOTA_SEQUENCE_KEY: &str = "quota:next_id";
const TASK_SEQUENCE_KEY: &str = "task:next_id";
const QUOTA_ID_PREFIX: &str = "quota:id:";

// One record per user. The id is only drawn from the sequence when the record is created.
// Returns the new id, or 0 if the user already has a record.
const INSERT_QUOTA_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
local id = redis.call('INCR', KEYS[2])
redis.call('HSET', KEYS[1], 'id', id, 'user_id', ARGV[1], 'daily_limit', ARGV[2])
redis.call('SET', ARGV[3] .. id, ARGV[1])
return id
";

const UPDATE_LIMIT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], 'daily_limit', ARGV[1])
return 1
";

// Insert, count with the new task included, undo if over the limit.
// Returns {status, count, limit}: 1 committed, 0 over limit, -1 no quota record.
const INSERT_TASK_SCRIPT: &str = r"
local limit = tonumber(redis.call('HGET', KEYS[1], 'daily_limit'))
if not limit then
    return {-1, 0, 0}
end
redis.call('SET', KEYS[3], ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[2])
local count = redis.call('ZCOUNT', KEYS[2], ARGV[4], '(' .. ARGV[5])
if count > limit then
    redis.call('ZREM', KEYS[2], ARGV[2])
    redis.call('DEL', KEYS[3])
    return {0, count, limit}
end
return {1, count, limit}
";

const DELETE_TASK_SCRIPT: &str = r"
local removed = redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[1])
return removed
";

fn user_key(user_id: UserId) -> String {
    format!("user:{}", user_id)
}

fn session_key(token: &str) -> String {
    format!("session:{}", token)
}

fn quota_user_key(user_id: UserId) -> String {
    format!("quota:user:{}", user_id)
}

fn quota_id_key(quota_id: QuotaId) -> String {
    format!("{}{}", QUOTA_ID_PREFIX, quota_id)
}

fn quota_tasks_key(quota_id: QuotaId) -> String {
    format!("quota:{}:tasks", quota_id)
}

fn task_key(task_id: TaskId) -> String {
    format!("task:{}", task_id)
}

fn parse_field<T: FromStr>(
    key: &str,
    fields: &HashMap<String, String>,
    name: &str,
) -> StoreResult<T> {
    fields
        .get(name)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| StoreError::Corrupt(format!("{} has no valid {}", key, name)))
}

fn quota_from_hash(key: &str, fields: HashMap<String, String>) -> StoreResult<Option<QuotaRecord>> {
    if fields.is_empty() {
        return Ok(None);
    }

    Ok(Some(QuotaRecord {
        id: parse_field(key, &fields, "id")?,
        user_id: parse_field(key, &fields, "user_id")?,
        daily_limit: parse_field(key, &fields, "daily_limit")?,
    }))
}

#[derive(Clone)]
pub struct RedisService {
    conn: ConnectionManager,
}

impl RedisService {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let url = if config.sentinel_enabled {
            config
                .sentinel_url
                .as_deref()
                .ok_or_else(|| StoreError::Config("Sentinel URL not configured".into()))?
        } else {
            config.url.as_str()
        };

        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis");
        Ok(Self::new(conn))
    }

    async fn next_id(&self, sequence: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(sequence, 1u64).await?)
    }
}

#[async_trait]
impl QuotaStore for RedisService {
    async fn quota_by_user(&self, user_id: UserId) -> StoreResult<Option<QuotaRecord>> {
        let mut conn = self.conn.clone();
        let key = quota_user_key(user_id);
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        quota_from_hash(&key, fields)
    }

    async fn quota_by_id(&self, id: QuotaId) -> StoreResult<Option<QuotaRecord>> {
        let mut conn = self.conn.clone();
        let owner: Option<UserId> = conn.get(quota_id_key(id)).await?;
        match owner {
            Some(user_id) => self.quota_by_user(user_id).await,
            None => Ok(None),
        }
    }

    async fn insert_quota(&self, user_id: UserId, daily_limit: u32) -> StoreResult<CreateQuota> {
        let mut conn = self.conn.clone();
        let id: QuotaId = Script::new(INSERT_QUOTA_SCRIPT)
            .key(quota_user_key(user_id))
            .key(QUOTA_SEQUENCE_KEY)
            .arg(user_id)
            .arg(daily_limit)
            .arg(QUOTA_ID_PREFIX)
            .invoke_async(&mut conn)
            .await?;

        if id == 0 {
            return Ok(CreateQuota::Conflict);
        }

        Ok(CreateQuota::Created(QuotaRecord {
            id,
            user_id,
            daily_limit,
        }))
    }

    async fn update_daily_limit(
        &self,
        record: &QuotaRecord,
        daily_limit: u32,
    ) -> StoreResult<Option<QuotaRecord>> {
        let mut conn = self.conn.clone();
        let updated: i64 = Script::new(UPDATE_LIMIT_SCRIPT)
            .key(quota_user_key(record.user_id))
            .arg(daily_limit)
            .invoke_async(&mut conn)
            .await?;

        Ok((updated == 1).then(|| QuotaRecord {
            daily_limit,
            ..record.clone()
        }))
    }

    async fn count_tasks_in(&self, quota_id: QuotaId, window: DayWindow) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        Ok(conn
            .zcount(
                quota_tasks_key(quota_id),
                window.start.timestamp_millis(),
                format!("({}", window.end.timestamp_millis()),
            )
            .await?)
    }
}

#[async_trait]
impl TaskStore for RedisService {
    async fn task_by_id(&self, id: TaskId) -> StoreResult<Option<Task>> {
        let mut conn = self.conn.clone();
        let task_data: Option<String> = conn.get(task_key(id)).await?;
        Ok(task_data
            .map(|data| serde_json::from_str(&data))
            .transpose()?)
    }

    async fn tasks_for_quota(&self, quota_id: QuotaId) -> StoreResult<Vec<Task>> {
        let mut conn = self.conn.clone();
        let task_ids: Vec<TaskId> = conn.zrange(quota_tasks_key(quota_id), 0, -1).await?;
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = task_ids.into_iter().map(task_key).collect();
        let task_data: Vec<Option<String>> =
            redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        // Entries deleted between ZRANGE and MGET come back empty
        let mut tasks = task_data
            .into_iter()
            .flatten()
            .map(|data| serde_json::from_str(&data).map_err(StoreError::from))
            .collect::<StoreResult<Vec<Task>>>()?;

        // ZRANGE breaks score ties by member string, so "10" would sort before "9"
        sort_by_creation(&mut tasks);
        Ok(tasks)
    }

    async fn insert_task_within_limit(
        &self,
        quota: &QuotaRecord,
        task: NewTask,
        window: DayWindow,
    ) -> StoreResult<InsertTask> {
        let task = task.into_task(self.next_id(TASK_SEQUENCE_KEY).await?, quota.id);
        let task_json = serde_json::to_string(&task)?;

        let mut conn = self.conn.clone();
        let (status, count, limit): (i64, u64, u32) = Script::new(INSERT_TASK_SCRIPT)
            .key(quota_user_key(quota.user_id))
            .key(quota_tasks_key(quota.id))
            .key(task_key(task.id))
            .arg(task_json)
            .arg(task.id)
            .arg(task.created_at.timestamp_millis())
            .arg(window.start.timestamp_millis())
            .arg(window.end.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        Ok(match status {
            1 => InsertTask::Committed {
                task,
                created_today: count,
            },
            0 => InsertTask::LimitExceeded {
                created_today: count,
                daily_limit: limit,
            },
            _ => InsertTask::MissingQuota,
        })
    }

    async fn update_task(
        &self,
        task: &Task,
        name: &str,
        status: TaskStatus,
    ) -> StoreResult<Option<Task>> {
        let updated = Task {
            name: name.to_string(),
            status,
            ..task.clone()
        };
        let task_json = serde_json::to_string(&updated)?;

        // XX so a concurrent delete is not undone
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(task_key(task.id))
            .arg(task_json)
            .arg("XX")
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| updated))
    }

    async fn delete_task(&self, task: &Task) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = Script::new(DELETE_TASK_SCRIPT)
            .key(task_key(task.id))
            .key(quota_tasks_key(task.quota_id))
            .arg(task.id)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}

#[async_trait]
impl UserStore for RedisService {
    async fn user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        let mut conn = self.conn.clone();
        let user_data: Option<String> = conn.get(user_key(id)).await?;
        Ok(user_data
            .map(|data| serde_json::from_str(&data))
            .transpose()?)
    }

    async fn insert_user(&self, user: &User) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(user_key(user.id))
            .arg(serde_json::to_string(user)?)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn save_session(&self, token: &str, user_id: UserId, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.num_seconds().max(1) as usize;
        let _: () = conn.set_ex(session_key(token), user_id, seconds).await?;
        Ok(())
    }

    async fn session_user(&self, token: &str) -> StoreResult<Option<UserId>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(session_key(token)).await?)
    }

    async fn delete_session(&self, token: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(session_key(token)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn keys_follow_the_documented_layout() {
        assert_eq!(quota_user_key(3), "quota:user:3");
        assert_eq!(quota_id_key(8), "quota:id:8");
        assert_eq!(quota_tasks_key(8), "quota:8:tasks");
        assert_eq!(task_key(21), "task:21");
        assert_eq!(session_key("abc"), "session:abc");
    }

    #[test]
    fn empty_hash_means_no_record() {
        assert_eq!(quota_from_hash("quota:user:1", HashMap::new()).unwrap(), None);
    }

    #[test]
    fn parses_quota_hash() {
        let record = quota_from_hash(
            "quota:user:1",
            fields(&[("id", "4"), ("user_id", "1"), ("daily_limit", "5")]),
        )
        .unwrap();

        assert_eq!(
            record,
            Some(QuotaRecord {
                id: 4,
                user_id: 1,
                daily_limit: 5
            })
        );
    }

    #[test]
    fn partial_hash_is_corrupt() {
        let err = quota_from_hash("quota:user:1", fields(&[("id", "4")])).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
