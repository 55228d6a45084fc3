mod quota;
mod task;
mod user;

pub use quota::{QuotaId, QuotaRecord};
pub use task::{NewTask, Task, TaskId, TaskStatus};
pub use user::{Role, User, UserId};
