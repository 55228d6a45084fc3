use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};

use crate::config::QuotaConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{QuotaId, QuotaRecord, UserId};
use crate::services::clock::{Clock, DayWindow};
use crate::services::store::{CreateQuota, QuotaStore};

/// Access to per-user quota records.
///
/// The default limit for new records comes from the [`QuotaConfig`] given at
/// construction; nothing here reads the environment.
#[derive(Clone)]
pub struct QuotaService {
    store: Arc<dyn QuotaStore>,
    default_daily_limit: u32,
    timezone: FixedOffset,
    clock: Arc<dyn Clock>,
}

impl QuotaService {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        config: &QuotaConfig,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let timezone = config
            .timezone()
            .map_err(|e| AppError::Internal(e.to_string()))?;

        Ok(Self {
            store,
            default_daily_limit: config.default_daily_limit,
            timezone,
            clock,
        })
    }

    pub fn default_daily_limit(&self) -> u32 {
        self.default_daily_limit
    }

    pub fn day_window(&self, instant: DateTime<Utc>) -> DayWindow {
        DayWindow::containing(instant, self.timezone)
    }

    pub fn today(&self) -> DayWindow {
        self.day_window(self.clock.now())
    }

    pub async fn get_by_user_id(&self, user_id: UserId) -> AppResult<QuotaRecord> {
        self.store.quota_by_user(user_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("quota record for user {} not found", user_id))
        })
    }

    pub async fn get_by_id(&self, id: QuotaId) -> AppResult<QuotaRecord> {
        self.store
            .quota_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("quota record {} not found", id)))
    }

    /// Creates the user's record. Fails with `AlreadyExists` if one exists.
    pub async fn create(&self, user_id: UserId, daily_limit: u32) -> AppResult<QuotaRecord> {
        match self.store.insert_quota(user_id, daily_limit).await? {
            CreateQuota::Created(record) => {
                tracing::info!(
                    "Created quota record {} for user {} with limit {}",
                    record.id,
                    user_id,
                    daily_limit
                );
                Ok(record)
            }
            CreateQuota::Conflict => Err(AppError::AlreadyExists(format!(
                "quota record for user {} already exists",
                user_id
            ))),
        }
    }

    /// Returns the user's record, creating it with the default limit if the
    /// user has none.
    ///
    /// Inserts first and reads only when the insert reports a conflict, so
    /// concurrent first callers all converge on the one stored record and
    /// none of them fails because another won.
    pub async fn ensure_exists(&self, user_id: UserId) -> AppResult<QuotaRecord> {
        match self
            .store
            .insert_quota(user_id, self.default_daily_limit)
            .await?
        {
            CreateQuota::Created(record) => {
                tracing::info!(
                    "Created quota record {} for user {} with default limit {}",
                    record.id,
                    user_id,
                    record.daily_limit
                );
                Ok(record)
            }
            CreateQuota::Conflict => {
                tracing::trace!("Quota record for user {} already exists", user_id);
                self.store.quota_by_user(user_id).await?.ok_or_else(|| {
                    tracing::error!(
                        "Quota insert for user {} conflicted but no record was found",
                        user_id
                    );
                    AppError::Internal(format!("quota record for user {} is inconsistent", user_id))
                })
            }
        }
    }

    pub async fn set_limit(&self, user_id: UserId, daily_limit: u32) -> AppResult<QuotaRecord> {
        let record = self.ensure_exists(user_id).await?;

        let updated = self
            .store
            .update_daily_limit(&record, daily_limit)
            .await?
            .ok_or_else(|| {
                AppError::Internal(format!("quota record {} vanished during update", record.id))
            })?;

        tracing::info!(
            "Daily limit for user {} changed from {} to {}",
            user_id,
            record.daily_limit,
            daily_limit
        );
        Ok(updated)
    }

    pub async fn count_tasks_created_today(&self, quota_id: QuotaId) -> AppResult<u64> {
        Ok(self.store.count_tasks_in(quota_id, self.today()).await?)
    }
}
