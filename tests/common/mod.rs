//! Shared fixtures for the integration tests.
//!
//! Each test file is its own crate, so not every helper is used everywhere.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};

use task_quota::config::{QuotaConfig, SessionConfig};
use task_quota::models::{Role, User, UserId};
use task_quota::services::ManualClock;
use task_quota::{MemoryStore, TaskService, UserService};

pub const ADMIN: UserId = 1;
pub const ALICE: UserId = 2;
pub const BOB: UserId = 3;

pub struct Harness {
    pub store: MemoryStore,
    pub tasks: TaskService,
    pub users: UserService,
    pub clock: Arc<ManualClock>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub async fn harness(default_daily_limit: u32) -> Harness {
    harness_with(QuotaConfig::with_limit(default_daily_limit), at("2024-05-14T09:00:00Z")).await
}

pub async fn harness_with(quota: QuotaConfig, now: DateTime<Utc>) -> Harness {
    init_tracing();

    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(now));
    let users = UserService::new(Arc::new(store.clone()), &SessionConfig::default())
        .expect("user service");

    for (id, role) in [(ADMIN, Role::Admin), (ALICE, Role::User), (BOB, Role::User)] {
        users
            .register(User {
                id,
                email: format!("user{}@example.com", id),
                role,
            })
            .await
            .expect("register user");
    }

    let tasks = TaskService::with_store(store.clone(), Arc::new(users.clone()), &quota, clock.clone())
        .expect("task service");

    Harness {
        store,
        tasks,
        users,
        clock,
    }
}
