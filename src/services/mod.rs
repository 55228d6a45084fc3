pub mod clock;
mod guard;
mod memory_store;
mod quota;
mod redis_service;
pub mod store;
mod task_service;
mod user_service;

pub use clock::{Clock, DayWindow, ManualClock, SystemClock};
pub use guard::OwnershipGuard;
pub use memory_store::{MemoryStore, MemoryTransaction};
pub use quota::QuotaService;
pub use redis_service::RedisService;
pub use store::{CreateQuota, InsertTask, QuotaStore, TaskStore, UserStore};
pub use task_service::TaskService;
pub use user_service::UserService;
