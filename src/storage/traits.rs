use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::record::{OriginalTable, SourceTag};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Lifecycle of a broker row. Deletion is the only terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerStatus {
    Available,
    UnderProcess,
    Processed,
}

impl BrokerStatus {
    pub fn code(self) -> i64 {
        match self {
            BrokerStatus::Available => 0,
            BrokerStatus::UnderProcess => 1,
            BrokerStatus::Processed => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(BrokerStatus::Available),
            1 => Some(BrokerStatus::UnderProcess),
            2 => Some(BrokerStatus::Processed),
            _ => None,
        }
    }
}

/// A row of the shared broker table.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerRow {
    pub id: i64,
    pub payload: Option<String>,
    pub status: BrokerStatus,
    pub owner_id: Option<String>,
    pub modify_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStatus {
    Processed,
    UnderProcess,
    InWriterQueue,
}

impl CursorStatus {
    pub fn code(self) -> i64 {
        match self {
            CursorStatus::Processed => 0,
            CursorStatus::UnderProcess => 1,
            CursorStatus::InWriterQueue => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(CursorStatus::Processed),
            1 => Some(CursorStatus::UnderProcess),
            2 => Some(CursorStatus::InWriterQueue),
            _ => None,
        }
    }
}

/// Per-owner position in the range-sourced table.
///
/// The status is kept as its raw code so that a corrupted value can be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeCursor {
    pub owner_id: String,
    pub range_from: i64,
    pub range_to: i64,
    pub status_code: i64,
}

impl RangeCursor {
    pub fn status(&self) -> Option<CursorStatus> {
        CursorStatus::from_code(self.status_code)
    }
}

/// A contiguous window of the range-sourced table now owned by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeClaim {
    pub range_from: i64,
    pub range_to: i64,
    pub ids: Vec<i64>,
}

/// A row of one of the install-side upstream log tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamRow {
    pub forras_id: i64,
    pub related_id: Option<i64>,
    pub log_date: Option<DateTime<Utc>>,
    pub client_app: Option<String>,
    pub host: Option<String>,
    pub session: Option<String>,
    pub assembly_name: Option<String>,
    pub assembly_info: Option<String>,
    pub function: Option<String>,
    pub log_level: i64,
    pub correlation_id: Option<String>,
    pub user_data: Option<String>,
    pub message: Option<String>,
    pub input_values: Option<String>,
    pub output_values: Option<String>,
    pub additional_data: Option<String>,
}

/// A row of the range-sourced FUV log table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuvLogRow {
    pub id: i64,
    pub task_status_id: Option<i64>,
    pub status: Option<i64>,
    pub error: Option<String>,
    pub log_date: Option<DateTime<Utc>>,
    pub module: Option<String>,
    pub function: Option<String>,
    pub message: Option<String>,
    pub input_values: Option<String>,
}

/// Natural key of a host dimension row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    pub host: Option<String>,
    pub host_config: Option<String>,
}

/// Natural key of a master-data dimension row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MasterDataKey {
    pub system: String,
    pub system_version: Option<String>,
    pub subsystem: String,
    pub subsystem_version: Option<String>,
    pub module: String,
    pub module_version: Option<String>,
    pub function: Option<String>,
}

/// A log fact row with its dimension references resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetLogRow {
    pub host_id: i64,
    pub master_data_id: i64,
    pub unique_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub external_id: Option<String>,
    pub log_date: DateTime<Utc>,
    pub created_on: DateTime<Utc>,
    pub session: Option<String>,
    pub log_level: i64,
    pub log_type: Option<String>,
    pub message: Option<String>,
    pub input_values: Option<String>,
    pub output_values: Option<String>,
    pub additional_data: Option<String>,
    pub user_data: Option<String>,
    pub is_audit: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub id: Uuid,
    pub name: String,
    /// Cron expression, either five or six fields.
    pub frequency: String,
    pub last_run: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub min_log_level: i64,
    pub lookback_minutes: i64,
    /// Comma separated mail addresses; `None` disables notification.
    pub recipients: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub rule_id: Uuid,
    pub created_on: DateTime<Utc>,
    pub match_count: i64,
}

/// The shared broker table plus the install-side upstream tables.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Atomically move up to `max_count` available rows to `owner_id`, then
    /// return every row the owner currently has under process.
    async fn claim_broker_rows(
        &self,
        max_count: usize,
        owner_id: &str,
    ) -> Result<Vec<BrokerRow>, StorageError>;

    /// Return all of the owner's rows to the available pool.
    async fn reset_broker_rows(&self, owner_id: &str) -> Result<usize, StorageError>;

    async fn mark_broker_rows_processed(
        &self,
        ids: &[i64],
        owner_id: &str,
    ) -> Result<usize, StorageError>;

    /// Delete rows among `ids` that are owned by `owner_id`.
    async fn delete_owned_broker_rows(
        &self,
        ids: &[i64],
        owner_id: &str,
    ) -> Result<usize, StorageError>;

    /// Delete rows among `ids` regardless of owner.
    async fn delete_broker_rows(&self, ids: &[i64]) -> Result<usize, StorageError>;

    async fn fetch_upstream(
        &self,
        tag: SourceTag,
        forras_id: i64,
    ) -> Result<Option<UpstreamRow>, StorageError>;

    async fn delete_original(&self, table: OriginalTable, key: i64) -> Result<usize, StorageError>;
}

/// The range-sourced FUV table and its per-owner cursors.
#[async_trait]
pub trait RangeStore: Send + Sync {
    async fn load_cursor(&self, owner_id: &str) -> Result<Option<RangeCursor>, StorageError>;

    /// Select up to `max_count` ids above the highest range handed out to any
    /// owner and record them as the owner's range, status UnderProcess.
    /// Returns `None` without touching the cursor if there is nothing new.
    async fn claim_next_range(
        &self,
        owner_id: &str,
        max_count: usize,
    ) -> Result<Option<RangeClaim>, StorageError>;

    async fn ids_in_range(&self, range_from: i64, range_to: i64) -> Result<Vec<i64>, StorageError>;

    /// Conditional status transition; returns whether a cursor was updated.
    async fn transition_cursor(
        &self,
        owner_id: &str,
        from: CursorStatus,
        to: CursorStatus,
    ) -> Result<bool, StorageError>;

    /// Lower an UnderProcess cursor's `range_to` to `range_to`. Returns false if
    /// the cursor is not UnderProcess or already ends at or below it.
    async fn shrink_range(&self, owner_id: &str, range_to: i64) -> Result<bool, StorageError>;

    /// InWriterQueue to Processed, only if the cursor still ends at `range_to`.
    async fn complete_range(&self, owner_id: &str, range_to: i64) -> Result<bool, StorageError>;

    async fn fetch_fuv_log(&self, id: i64) -> Result<Option<FuvLogRow>, StorageError>;

    async fn delete_original(&self, table: OriginalTable, key: i64) -> Result<usize, StorageError>;
}

/// The normalized target: dimensions, log facts and alert rules.
#[async_trait]
pub trait TargetStore: Send + Sync {
    async fn find_host(&self, key: &HostKey) -> Result<Option<i64>, StorageError>;

    async fn find_master_data(&self, key: &MasterDataKey) -> Result<Option<i64>, StorageError>;

    /// Insert new dimension rows, returning generated ids in input order.
    async fn insert_dimensions(
        &self,
        hosts: &[HostKey],
        master_data: &[MasterDataKey],
    ) -> Result<(Vec<i64>, Vec<i64>), StorageError>;

    async fn insert_logs(&self, rows: &[TargetLogRow]) -> Result<usize, StorageError>;

    async fn get_log(&self, unique_id: Uuid) -> Result<Option<TargetLogRow>, StorageError>;

    async fn count_logs(&self) -> Result<i64, StorageError>;

    async fn host_exists(&self, id: i64) -> Result<bool, StorageError>;

    async fn master_data_exists(&self, id: i64) -> Result<bool, StorageError>;

    /// Delete up to `limit` logs created before `cutoff`.
    async fn delete_logs_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, StorageError>;

    /// Delete up to `limit` master-data rows no log references.
    async fn delete_orphan_master_data(&self, limit: usize) -> Result<usize, StorageError>;

    async fn active_alert_rules(&self) -> Result<Vec<AlertRule>, StorageError>;

    async fn get_alert_rule(&self, id: Uuid) -> Result<Option<AlertRule>, StorageError>;

    async fn save_alert_rule(&self, rule: &AlertRule) -> Result<(), StorageError>;

    async fn mark_alert_rule_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError>;

    async fn count_logs_since(
        &self,
        min_log_level: i64,
        since: DateTime<Utc>,
    ) -> Result<i64, StorageError>;

    async fn record_alert_event(&self, event: &AlertEvent) -> Result<(), StorageError>;
}
