//! Retention for the target log store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::storage::{StorageError, TargetStore};
use crate::worker::{Worker, WorkerError};

#[derive(Debug, Error)]
pub enum CleanerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("retention of {retention_days} days reaches before the earliest representable date")]
    Cutoff { retention_days: u32 },
}

#[derive(Debug, Clone)]
pub struct CleanerSettings {
    pub retention_days: u32,
    pub batch_size: usize,
    pub max_iterations: usize,
    pub orphan_batch: usize,
    pub iteration_pause: Duration,
}

impl Default for CleanerSettings {
    fn default() -> Self {
        Self {
            retention_days: 30,
            batch_size: 20_000,
            max_iterations: 60,
            orphan_batch: 50_000,
            iteration_pause: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub cutoff: DateTime<Utc>,
    pub iterations: usize,
    pub logs_deleted: usize,
    pub master_data_deleted: usize,
}

/// Deletes logs past the retention window in bounded batches, then orphaned master data.
///
/// Hosts are never removed.
pub struct RetentionCleaner {
    target: Arc<dyn TargetStore>,
    settings: CleanerSettings,
}

impl RetentionCleaner {
    pub fn new(target: Arc<dyn TargetStore>, settings: CleanerSettings) -> Self {
        Self { target, settings }
    }

    /// Start of the current hour minus the retention window.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, CleanerError> {
        let retention_days = self.settings.retention_days;
        let hour = now.duration_trunc(chrono::Duration::hours(1)).unwrap_or(now);
        chrono::Duration::try_days(i64::from(retention_days))
            .and_then(|window| hour.checked_sub_signed(window))
            .ok_or(CleanerError::Cutoff { retention_days })
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<CleanupReport, CleanerError> {
        let cutoff = self.cutoff(now)?;
        let mut iterations = 0;
        let mut logs_deleted = 0;
        let mut drained = false;

        while iterations < self.settings.max_iterations {
            iterations += 1;
            let deleted = self
                .target
                .delete_logs_before(cutoff, self.settings.batch_size)
                .await?;
            if deleted == 0 {
                drained = true;
                break;
            }
            logs_deleted += deleted;
            tokio::time::sleep(self.settings.iteration_pause).await;
        }

        if !drained {
            debug!(iterations, "Iteration ceiling reached, remaining logs wait for the next run");
        }

        let master_data_deleted = self
            .target
            .delete_orphan_master_data(self.settings.orphan_batch)
            .await?;

        info!(
            cutoff = %cutoff,
            logs_deleted,
            master_data_deleted,
            "Retention cleanup finished"
        );

        Ok(CleanupReport {
            cutoff,
            iterations,
            logs_deleted,
            master_data_deleted,
        })
    }
}

#[async_trait]
impl Worker for RetentionCleaner {
    fn name(&self) -> &'static str {
        "cleaner"
    }

    async fn run_once(&mut self) -> Result<(), WorkerError> {
        self.run_at(Utc::now()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DuckDbStorage, MasterDataKey, TargetLogRow};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn settings(batch_size: usize, max_iterations: usize) -> CleanerSettings {
        CleanerSettings {
            retention_days: 7,
            batch_size,
            max_iterations,
            orphan_batch: 100,
            iteration_pause: Duration::ZERO,
        }
    }

    fn log(master_data_id: i64, created_on: DateTime<Utc>) -> TargetLogRow {
        TargetLogRow {
            host_id: 1,
            master_data_id,
            unique_id: Uuid::new_v4(),
            correlation_id: None,
            external_id: None,
            log_date: created_on,
            created_on,
            session: None,
            log_level: 2,
            log_type: None,
            message: None,
            input_values: None,
            output_values: None,
            additional_data: None,
            user_data: None,
            is_audit: false,
        }
    }

    async fn storage() -> Arc<DuckDbStorage> {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_target_schema().await.unwrap();
        Arc::new(storage)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 14, 37, 12).unwrap()
    }

    #[tokio::test]
    async fn test_cutoff_truncates_to_hour() {
        let cleaner = RetentionCleaner::new(storage().await, settings(10, 10));
        assert_eq!(
            cleaner.cutoff(now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_retention_past_earliest_date_is_an_error() {
        let storage = storage().await;
        storage.insert_logs(&[log(1, now())]).await.unwrap();
        let cleaner = RetentionCleaner::new(
            storage.clone(),
            CleanerSettings {
                retention_days: u32::MAX,
                ..settings(10, 10)
            },
        );

        assert!(matches!(
            cleaner.cutoff(now()),
            Err(CleanerError::Cutoff { retention_days: u32::MAX })
        ));
        assert!(matches!(cleaner.run_at(now()).await, Err(CleanerError::Cutoff { .. })));
        assert_eq!(storage.count_logs().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rows_at_or_after_cutoff_survive() {
        let storage = storage().await;
        let cleaner = RetentionCleaner::new(storage.clone(), settings(2, 60));
        let cutoff = cleaner.cutoff(now()).unwrap();

        let old: Vec<_> = (0..5).map(|_| log(1, cutoff - chrono::Duration::seconds(1))).collect();
        let kept = [log(1, cutoff), log(1, cutoff + chrono::Duration::hours(1))];
        storage.insert_logs(&old).await.unwrap();
        storage.insert_logs(&kept).await.unwrap();

        let report = cleaner.run_at(now()).await.unwrap();
        assert_eq!(report.logs_deleted, 5);
        assert_eq!(report.iterations, 4);
        assert_eq!(storage.count_logs().await.unwrap(), 2);
        for row in &kept {
            assert!(storage.get_log(row.unique_id).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_stops_at_iteration_ceiling() {
        let storage = storage().await;
        let cleaner = RetentionCleaner::new(storage.clone(), settings(2, 3));
        let stale = now() - chrono::Duration::days(30);
        let rows: Vec<_> = (0..10).map(|_| log(1, stale)).collect();
        storage.insert_logs(&rows).await.unwrap();

        let report = cleaner.run_at(now()).await.unwrap();
        assert_eq!(report.iterations, 3);
        assert_eq!(report.logs_deleted, 6);
        assert_eq!(storage.count_logs().await.unwrap(), 4);

        cleaner.run_at(now()).await.unwrap();
        assert_eq!(storage.count_logs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_orphaned_master_data_removed_after_logs() {
        let storage = storage().await;
        let key = |function: &str| MasterDataKey {
            system: "S".to_string(),
            system_version: None,
            subsystem: "Sub".to_string(),
            subsystem_version: None,
            module: "N/A".to_string(),
            module_version: None,
            function: Some(function.to_string()),
        };
        let (_, md) = storage
            .insert_dimensions(&[], &[key("old"), key("live")])
            .await
            .unwrap();
        storage
            .insert_logs(&[
                log(md[0], now() - chrono::Duration::days(30)),
                log(md[1], now()),
            ])
            .await
            .unwrap();

        let cleaner = RetentionCleaner::new(storage.clone(), settings(100, 60));
        let report = cleaner.run_at(now()).await.unwrap();

        assert_eq!(report.master_data_deleted, 1);
        assert!(!storage.master_data_exists(md[0]).await.unwrap());
        assert!(storage.master_data_exists(md[1]).await.unwrap());
    }
}
