// Task tracking with a per-user daily creation quota. TaskService is the entry point.
pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use errors::{AppError, AppResult, ErrorKind};
pub use services::{MemoryStore, QuotaService, RedisService, TaskService, UserService};
