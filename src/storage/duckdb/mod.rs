mod range;
mod source;
mod target;

use super::traits::{BrokerRow, BrokerStatus, FuvLogRow, StorageError, UpstreamRow};
use crate::record::{OriginDatabase, OriginalTable, SourceTag};
use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        // On non-Unix systems, assume process is running to be safe
        true
    }
}

/// Extract PID from DuckDB lock error message
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    // Error format: "... (PID 12345) ..."
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

/// Remove DuckDB lock files (WAL and lock files)
fn remove_lock_files(db_path: &Path) -> std::io::Result<()> {
    for suffix in ["wal", "lock"] {
        let path = PathBuf::from(format!("{}.{}", db_path.display(), suffix));
        if path.exists() {
            std::fs::remove_file(&path)?;
            tracing::info!("Removed stale {} file: {}", suffix, path.display());
        }
    }
    Ok(())
}

const SOURCE_SCHEMA: &str = "
    CREATE SEQUENCE IF NOT EXISTS broker_rows_id_seq START 1;
    CREATE TABLE IF NOT EXISTS broker_rows (
        id BIGINT PRIMARY KEY DEFAULT nextval('broker_rows_id_seq'),
        payload VARCHAR,
        status BIGINT NOT NULL DEFAULT 0,
        owner_id VARCHAR,
        modify_date TIMESTAMPTZ NOT NULL DEFAULT current_timestamp
    );
    CREATE INDEX IF NOT EXISTS idx_broker_rows_owner ON broker_rows(owner_id);
";

const RANGE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS fuv_log (
        id BIGINT PRIMARY KEY,
        task_status_id BIGINT,
        status BIGINT,
        error VARCHAR,
        log_date TIMESTAMPTZ,
        module_name VARCHAR,
        function_name VARCHAR,
        message VARCHAR,
        input_values VARCHAR
    );
    CREATE TABLE IF NOT EXISTS range_cursors (
        owner_id VARCHAR PRIMARY KEY,
        range_from BIGINT NOT NULL DEFAULT 0,
        range_to BIGINT NOT NULL DEFAULT 0,
        status BIGINT NOT NULL DEFAULT 0
    );
";

const TARGET_SCHEMA: &str = "
    CREATE SEQUENCE IF NOT EXISTS log_hosts_id_seq START 1;
    CREATE TABLE IF NOT EXISTS log_hosts (
        id BIGINT PRIMARY KEY DEFAULT nextval('log_hosts_id_seq'),
        host VARCHAR,
        host_config VARCHAR
    );
    CREATE SEQUENCE IF NOT EXISTS log_master_data_id_seq START 1;
    CREATE TABLE IF NOT EXISTS log_master_data (
        id BIGINT PRIMARY KEY DEFAULT nextval('log_master_data_id_seq'),
        system_name VARCHAR NOT NULL,
        system_version VARCHAR,
        subsystem_name VARCHAR NOT NULL,
        subsystem_version VARCHAR,
        module_name VARCHAR NOT NULL,
        module_version VARCHAR,
        function_name VARCHAR
    );
    CREATE SEQUENCE IF NOT EXISTS logs_id_seq START 1;
    CREATE TABLE IF NOT EXISTS logs (
        id BIGINT PRIMARY KEY DEFAULT nextval('logs_id_seq'),
        host_id BIGINT NOT NULL,
        master_data_id BIGINT NOT NULL,
        unique_id VARCHAR NOT NULL,
        correlation_id VARCHAR,
        external_id VARCHAR,
        log_date TIMESTAMPTZ NOT NULL,
        created_on TIMESTAMPTZ NOT NULL,
        session_id VARCHAR,
        log_level BIGINT NOT NULL,
        log_type VARCHAR,
        message VARCHAR,
        input_values VARCHAR,
        output_values VARCHAR,
        additional_data VARCHAR,
        user_data VARCHAR,
        is_audit BOOLEAN NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_logs_created_on ON logs(created_on);
    CREATE INDEX IF NOT EXISTS idx_logs_master_data ON logs(master_data_id);
    CREATE TABLE IF NOT EXISTS alert_rules (
        id VARCHAR PRIMARY KEY,
        name VARCHAR NOT NULL,
        frequency VARCHAR NOT NULL,
        last_run TIMESTAMPTZ,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        min_log_level BIGINT NOT NULL DEFAULT 4,
        lookback_minutes BIGINT NOT NULL DEFAULT 60,
        recipients VARCHAR
    );
    CREATE SEQUENCE IF NOT EXISTS alert_events_id_seq START 1;
    CREATE TABLE IF NOT EXISTS alert_events (
        id BIGINT PRIMARY KEY DEFAULT nextval('alert_events_id_seq'),
        rule_id VARCHAR NOT NULL,
        created_on TIMESTAMPTZ NOT NULL,
        match_count BIGINT NOT NULL
    );
";

/// DuckDB implementation of the source, range and target stores.
///
/// Each deployment opens one instance per database file; tests usually share a
/// single in-memory instance for all three roles.
#[derive(Clone)]
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStorage {
    /// Open a database file, recovering from a stale lock left by a dead process
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Database(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let e = match Connection::open(path) {
            Ok(conn) => return Ok(Self::from_connection(conn)),
            Err(e) => e,
        };

        let error_msg = e.to_string();
        if error_msg.contains("Could not set lock") {
            tracing::warn!("Database lock detected: {}", error_msg);

            if let Some(pid) = extract_pid_from_lock_error(&error_msg) {
                tracing::info!("Lock is held by PID {}, checking if process is running", pid);

                if !is_process_running(pid) {
                    tracing::warn!("Process {} is not running, removing stale lock files", pid);

                    if let Err(io_err) = remove_lock_files(path) {
                        tracing::error!("Failed to remove lock files: {}", io_err);
                        return Err(e.into());
                    }

                    tracing::info!("Retrying database connection after removing stale locks");
                    let conn = Connection::open(path)?;
                    return Ok(Self::from_connection(conn));
                }

                tracing::error!("Process {} is still running, cannot acquire lock", pid);
            }
        }

        Err(e.into())
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn with_conn<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::Database("Connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    /// Create the broker table and the install-side upstream tables
    pub async fn init_source_schema(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch(SOURCE_SCHEMA)?;
            for tag in SourceTag::ALL {
                let table = tag.original_table();
                if table.database != OriginDatabase::Install {
                    continue;
                }
                conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        forras_id BIGINT PRIMARY KEY,
                        related_id BIGINT,
                        log_date TIMESTAMPTZ,
                        client_app VARCHAR,
                        host VARCHAR,
                        session_id VARCHAR,
                        assembly_name VARCHAR,
                        assembly_info VARCHAR,
                        function_name VARCHAR,
                        log_level BIGINT NOT NULL DEFAULT 0,
                        correlation_id VARCHAR,
                        user_data VARCHAR,
                        message VARCHAR,
                        input_values VARCHAR,
                        output_values VARCHAR,
                        additional_data VARCHAR
                    )",
                    table.table
                ))?;
            }
            Ok(())
        })
        .await
    }

    /// Create the FUV log table and the range cursor table
    pub async fn init_range_schema(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch(RANGE_SCHEMA)?;
            Ok(())
        })
        .await
    }

    /// Create the dimension, log fact and alerting tables
    pub async fn init_target_schema(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch(TARGET_SCHEMA)?;
            Ok(())
        })
        .await
    }

    /// Create every table; used when one database plays all three roles
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        self.init_source_schema().await?;
        self.init_range_schema().await?;
        self.init_target_schema().await
    }

    /// Append a row to the broker table, as an upstream producer would.
    pub async fn insert_broker_row(&self, payload: Option<&str>) -> Result<i64, StorageError> {
        let payload = payload.map(str::to_string);
        self.with_conn(move |conn| {
            let id = conn.query_row(
                "INSERT INTO broker_rows (payload, status) VALUES (?, ?) RETURNING id",
                duckdb::params![payload, BrokerStatus::Available.code()],
                |row| row.get::<_, i64>(0),
            )?;
            Ok(id)
        })
        .await
    }

    pub async fn get_broker_row(&self, id: i64) -> Result<Option<BrokerRow>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, payload, status, owner_id, epoch_us(modify_date)
                 FROM broker_rows WHERE id = ?",
            )?;
            let mut rows = stmt.query_map(duckdb::params![id], source::broker_row_from_row)?;
            Ok(rows.next().transpose()?)
        })
        .await
    }

    pub async fn insert_upstream_row(
        &self,
        tag: SourceTag,
        row: &UpstreamRow,
    ) -> Result<(), StorageError> {
        let table = tag.original_table();
        if table.database != OriginDatabase::Install {
            return Err(StorageError::Database(format!(
                "{} is not an install-side table",
                table.table
            )));
        }

        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (forras_id, related_id, log_date, client_app, host, session_id,
                        assembly_name, assembly_info, function_name, log_level, correlation_id,
                        user_data, message, input_values, output_values, additional_data)
                     VALUES (?, ?, to_timestamp(? / 1000000.0), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    table.table
                ),
                duckdb::params![
                    row.forras_id,
                    row.related_id,
                    row.log_date.map(|d| d.timestamp_micros()),
                    row.client_app,
                    row.host,
                    row.session,
                    row.assembly_name,
                    row.assembly_info,
                    row.function,
                    row.log_level,
                    row.correlation_id,
                    row.user_data,
                    row.message,
                    row.input_values,
                    row.output_values,
                    row.additional_data,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn insert_fuv_log(&self, row: &FuvLogRow) -> Result<(), StorageError> {
        let row = row.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO fuv_log (id, task_status_id, status, error, log_date, module_name,
                    function_name, message, input_values)
                 VALUES (?, ?, ?, ?, to_timestamp(? / 1000000.0), ?, ?, ?, ?)",
                duckdb::params![
                    row.id,
                    row.task_status_id,
                    row.status,
                    row.error,
                    row.log_date.map(|d| d.timestamp_micros()),
                    row.module,
                    row.function,
                    row.message,
                    row.input_values,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn original_exists(&self, table: OriginalTable, key: i64) -> Result<bool, StorageError> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                &format!(
                    "SELECT count(*) FROM {} WHERE {} = ?",
                    table.table, table.key_column
                ),
                duckdb::params![key],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }
}

/// Shared by the source and range stores: both hold original tables.
async fn delete_original_row(
    storage: &DuckDbStorage,
    table: OriginalTable,
    key: i64,
) -> Result<usize, StorageError> {
    storage
        .with_conn(move |conn| {
            let deleted = conn.execute(
                &format!("DELETE FROM {} WHERE {} = ?", table.table, table.key_column),
                duckdb::params![key],
            )?;
            Ok(deleted)
        })
        .await
}

fn conversion_error(idx: usize, ty: duckdb::types::Type, msg: &str) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(
        idx,
        ty,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())),
    )
}

pub(crate) fn timestamp_at(idx: usize, micros: i64) -> duckdb::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| conversion_error(idx, duckdb::types::Type::BigInt, "invalid timestamp"))
}

pub(crate) fn opt_timestamp_at(idx: usize, micros: Option<i64>) -> duckdb::Result<Option<DateTime<Utc>>> {
    micros.map(|m| timestamp_at(idx, m)).transpose()
}

pub(crate) fn uuid_at(idx: usize, text: &str) -> duckdb::Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| {
        duckdb::Error::FromSqlConversionFailure(idx, duckdb::types::Type::Text, Box::new(e))
    })
}

/// `?, ?, ?` for an IN list of `n` values.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
