use serde::{Deserialize, Serialize};

use super::UserId;

pub type QuotaId = u64;

// Per-user record holding the daily task creation limit. At most one exists per user.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct QuotaRecord {
    pub id: QuotaId,
    pub user_id: UserId,
    pub daily_limit: u32,
}
