use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QuotaId;

pub type TaskId = u64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskStatus {
    #[default]
    ToDo,
    Processing,
    Done,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub quota_id: QuotaId,
    pub created_at: DateTime<Utc>,
}

// A task that has not been stored yet; the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub name: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl NewTask {
    pub fn into_task(self, id: TaskId, quota_id: QuotaId) -> Task {
        Task {
            id,
            name: self.name,
            status: self.status,
            quota_id,
            created_at: self.created_at,
        }
    }
}
