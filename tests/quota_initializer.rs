mod common;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use common::{harness, init_tracing, ALICE, BOB};
use task_quota::config::QuotaConfig;
use task_quota::errors::{StoreError, StoreResult};
use task_quota::models::{QuotaId, QuotaRecord, TaskStatus, UserId};
use task_quota::services::{CreateQuota, DayWindow, QuotaStore, SystemClock};
use task_quota::{ErrorKind, MemoryStore, QuotaService};

fn quota_service(store: Arc<dyn QuotaStore>, limit: u32) -> QuotaService {
    QuotaService::new(store, &QuotaConfig::with_limit(limit), Arc::new(SystemClock)).unwrap()
}

#[tokio::test]
async fn ensure_exists_is_stable_across_calls() {
    let store = MemoryStore::new();
    let quotas = quota_service(Arc::new(store.clone()), 5);

    let first = quotas.ensure_exists(ALICE).await.unwrap();
    let second = quotas.ensure_exists(ALICE).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.daily_limit, 5);
    assert_eq!(store.quota_records_for(ALICE).await, 1);
}

#[tokio::test]
async fn new_records_use_the_configured_default() {
    let quotas = quota_service(Arc::new(MemoryStore::new()), 3);
    assert_eq!(quotas.ensure_exists(ALICE).await.unwrap().daily_limit, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_first_callers_converge_on_one_record() {
    init_tracing();
    let store = MemoryStore::new();
    let quotas = quota_service(Arc::new(store.clone()), 5);

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let quotas = quotas.clone();
            tokio::spawn(async move { quotas.ensure_exists(ALICE).await })
        })
        .collect();

    let records: Vec<QuotaRecord> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert!(records.iter().all(|record| record == &records[0]));
    assert_eq!(store.quota_records_for(ALICE).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_first_task_creations_make_one_record() {
    let h = harness(5).await;

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let tasks = h.tasks.clone();
            tokio::spawn(async move {
                tasks
                    .create_task(BOB, &format!("task {}", i), TaskStatus::ToDo)
                    .await
            })
        })
        .collect();
    join_all(handles).await;

    assert_eq!(h.store.quota_records_for(BOB).await, 1);
}

#[tokio::test]
async fn direct_create_reports_existing_record() {
    let quotas = quota_service(Arc::new(MemoryStore::new()), 5);
    quotas.ensure_exists(ALICE).await.unwrap();

    let err = quotas.create(ALICE, 9).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(quotas.get_by_user_id(ALICE).await.unwrap().daily_limit, 5);
}

#[tokio::test]
async fn lookups_of_missing_records_are_not_found() {
    let quotas = quota_service(Arc::new(MemoryStore::new()), 5);

    assert_eq!(quotas.get_by_user_id(ALICE).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(quotas.get_by_id(99).await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn get_by_id_and_user_agree() {
    let quotas = quota_service(Arc::new(MemoryStore::new()), 5);
    let record = quotas.ensure_exists(ALICE).await.unwrap();

    assert_eq!(quotas.get_by_id(record.id).await.unwrap(), record);
    assert_eq!(quotas.get_by_user_id(ALICE).await.unwrap(), record);
}

#[tokio::test]
async fn set_limit_creates_missing_record() {
    let store = MemoryStore::new();
    let quotas = quota_service(Arc::new(store.clone()), 5);

    let record = quotas.set_limit(BOB, 12).await.unwrap();

    assert_eq!(record.daily_limit, 12);
    assert_eq!(quotas.get_by_user_id(BOB).await.unwrap().daily_limit, 12);
    assert_eq!(store.quota_records_for(BOB).await, 1);
}

#[tokio::test]
async fn count_starts_at_zero() {
    let quotas = quota_service(Arc::new(MemoryStore::new()), 5);
    let record = quotas.ensure_exists(ALICE).await.unwrap();

    assert_eq!(quotas.count_tasks_created_today(record.id).await.unwrap(), 0);
}

// Store whose inserts fail outright, or always conflict without a record to read back.
struct BrokenStore {
    conflict_only: bool,
}

#[async_trait]
impl QuotaStore for BrokenStore {
    async fn quota_by_user(&self, _user_id: UserId) -> StoreResult<Option<QuotaRecord>> {
        Ok(None)
    }

    async fn quota_by_id(&self, _id: QuotaId) -> StoreResult<Option<QuotaRecord>> {
        Ok(None)
    }

    async fn insert_quota(&self, _user_id: UserId, _daily_limit: u32) -> StoreResult<CreateQuota> {
        if self.conflict_only {
            Ok(CreateQuota::Conflict)
        } else {
            Err(StoreError::Corrupt("disk on fire".into()))
        }
    }

    async fn update_daily_limit(
        &self,
        _record: &QuotaRecord,
        _daily_limit: u32,
    ) -> StoreResult<Option<QuotaRecord>> {
        Ok(None)
    }

    async fn count_tasks_in(&self, _quota_id: QuotaId, _window: DayWindow) -> StoreResult<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn storage_failure_is_internal() {
    let quotas = quota_service(Arc::new(BrokenStore { conflict_only: false }), 5);

    let err = quotas.ensure_exists(ALICE).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[tokio::test]
async fn conflict_without_record_is_internal() {
    let quotas = quota_service(Arc::new(BrokenStore { conflict_only: true }), 5);

    let err = quotas.ensure_exists(ALICE).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[test]
fn out_of_range_offset_is_a_configuration_fault() {
    let config = QuotaConfig {
        default_daily_limit: 5,
        utc_offset_minutes: 48 * 60,
    };

    let err = QuotaService::new(Arc::new(MemoryStore::new()), &config, Arc::new(SystemClock))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Internal);
}
