use super::{opt_timestamp_at, timestamp_at, uuid_at, DuckDbStorage};
use crate::storage::traits::{
    AlertEvent, AlertRule, HostKey, MasterDataKey, StorageError, TargetLogRow, TargetStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

fn alert_rule_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<AlertRule> {
    Ok(AlertRule {
        id: uuid_at(0, &row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        frequency: row.get(2)?,
        last_run: opt_timestamp_at(3, row.get(3)?)?,
        is_active: row.get(4)?,
        min_log_level: row.get(5)?,
        lookback_minutes: row.get(6)?,
        recipients: row.get(7)?,
    })
}

const ALERT_RULE_COLUMNS: &str =
    "id, name, frequency, epoch_us(last_run), is_active, min_log_level, lookback_minutes, recipients";

#[async_trait]
impl TargetStore for DuckDbStorage {
    async fn find_host(&self, key: &HostKey) -> Result<Option<i64>, StorageError> {
        let key = key.clone();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM log_hosts
                 WHERE host IS NOT DISTINCT FROM ? AND host_config IS NOT DISTINCT FROM ?
                 ORDER BY id LIMIT 1",
            )?;
            let mut rows = stmt.query_map(duckdb::params![key.host, key.host_config], |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(rows.next().transpose()?)
        })
        .await
    }

    async fn find_master_data(&self, key: &MasterDataKey) -> Result<Option<i64>, StorageError> {
        let key = key.clone();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM log_master_data
                 WHERE system_name = ?
                   AND system_version IS NOT DISTINCT FROM ?
                   AND subsystem_name = ?
                   AND subsystem_version IS NOT DISTINCT FROM ?
                   AND module_name = ?
                   AND module_version IS NOT DISTINCT FROM ?
                   AND function_name IS NOT DISTINCT FROM ?
                 ORDER BY id LIMIT 1",
            )?;
            let mut rows = stmt.query_map(
                duckdb::params![
                    key.system,
                    key.system_version,
                    key.subsystem,
                    key.subsystem_version,
                    key.module,
                    key.module_version,
                    key.function,
                ],
                |row| row.get::<_, i64>(0),
            )?;
            Ok(rows.next().transpose()?)
        })
        .await
    }

    async fn insert_dimensions(
        &self,
        hosts: &[HostKey],
        master_data: &[MasterDataKey],
    ) -> Result<(Vec<i64>, Vec<i64>), StorageError> {
        if hosts.is_empty() && master_data.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let hosts = hosts.to_vec();
        let master_data = master_data.to_vec();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let mut host_ids = Vec::with_capacity(hosts.len());
            for host in &hosts {
                host_ids.push(tx.query_row(
                    "INSERT INTO log_hosts (host, host_config) VALUES (?, ?) RETURNING id",
                    duckdb::params![host.host, host.host_config],
                    |row| row.get::<_, i64>(0),
                )?);
            }

            let mut master_data_ids = Vec::with_capacity(master_data.len());
            for key in &master_data {
                master_data_ids.push(tx.query_row(
                    "INSERT INTO log_master_data (system_name, system_version, subsystem_name,
                        subsystem_version, module_name, module_version, function_name)
                     VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
                    duckdb::params![
                        key.system,
                        key.system_version,
                        key.subsystem,
                        key.subsystem_version,
                        key.module,
                        key.module_version,
                        key.function,
                    ],
                    |row| row.get::<_, i64>(0),
                )?);
            }

            tx.commit()?;
            Ok((host_ids, master_data_ids))
        })
        .await
    }

    async fn insert_logs(&self, rows: &[TargetLogRow]) -> Result<usize, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let rows = rows.to_vec();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO logs (host_id, master_data_id, unique_id, correlation_id,
                        external_id, log_date, created_on, session_id, log_level, log_type,
                        message, input_values, output_values, additional_data, user_data, is_audit)
                     VALUES (?, ?, ?, ?, ?, to_timestamp(? / 1000000.0), to_timestamp(? / 1000000.0),
                        ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )?;

                for log in &rows {
                    stmt.execute(duckdb::params![
                        log.host_id,
                        log.master_data_id,
                        log.unique_id.to_string(),
                        log.correlation_id.map(|id| id.to_string()),
                        log.external_id,
                        log.log_date.timestamp_micros(),
                        log.created_on.timestamp_micros(),
                        log.session,
                        log.log_level,
                        log.log_type,
                        log.message,
                        log.input_values,
                        log.output_values,
                        log.additional_data,
                        log.user_data,
                        log.is_audit,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(rows.len())
        })
        .await
    }

    async fn get_log(&self, unique_id: Uuid) -> Result<Option<TargetLogRow>, StorageError> {
        let unique_id = unique_id.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT host_id, master_data_id, unique_id, correlation_id, external_id,
                        epoch_us(log_date), epoch_us(created_on), session_id, log_level, log_type,
                        message, input_values, output_values, additional_data, user_data, is_audit
                 FROM logs WHERE unique_id = ?",
            )?;
            let mut rows = stmt.query_map(duckdb::params![unique_id], |row| {
                let correlation_id: Option<String> = row.get(3)?;
                Ok(TargetLogRow {
                    host_id: row.get(0)?,
                    master_data_id: row.get(1)?,
                    unique_id: uuid_at(2, &row.get::<_, String>(2)?)?,
                    correlation_id: correlation_id.map(|id| uuid_at(3, &id)).transpose()?,
                    external_id: row.get(4)?,
                    log_date: timestamp_at(5, row.get(5)?)?,
                    created_on: timestamp_at(6, row.get(6)?)?,
                    session: row.get(7)?,
                    log_level: row.get(8)?,
                    log_type: row.get(9)?,
                    message: row.get(10)?,
                    input_values: row.get(11)?,
                    output_values: row.get(12)?,
                    additional_data: row.get(13)?,
                    user_data: row.get(14)?,
                    is_audit: row.get(15)?,
                })
            })?;
            Ok(rows.next().transpose()?)
        })
        .await
    }

    async fn count_logs(&self) -> Result<i64, StorageError> {
        self.with_conn(|conn| {
            let count = conn.query_row("SELECT count(*) FROM logs", [], |row| row.get(0))?;
            Ok(count)
        })
        .await
    }

    async fn host_exists(&self, id: i64) -> Result<bool, StorageError> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT count(*) FROM log_hosts WHERE id = ?",
                duckdb::params![id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn master_data_exists(&self, id: i64) -> Result<bool, StorageError> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT count(*) FROM log_master_data WHERE id = ?",
                duckdb::params![id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn delete_logs_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, StorageError> {
        let cutoff_micros = cutoff.timestamp_micros();

        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM logs WHERE id IN (
                     SELECT id FROM logs
                     WHERE created_on < to_timestamp(? / 1000000.0)
                     ORDER BY id LIMIT ?
                 )",
                duckdb::params![cutoff_micros, limit as i64],
            )?;
            Ok(deleted)
        })
        .await
    }

    async fn delete_orphan_master_data(&self, limit: usize) -> Result<usize, StorageError> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM log_master_data WHERE id IN (
                     SELECT md.id FROM log_master_data md
                     WHERE NOT EXISTS (SELECT 1 FROM logs l WHERE l.master_data_id = md.id)
                     ORDER BY md.id LIMIT ?
                 )",
                duckdb::params![limit as i64],
            )?;
            Ok(deleted)
        })
        .await
    }

    async fn active_alert_rules(&self) -> Result<Vec<AlertRule>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM alert_rules WHERE is_active ORDER BY name",
                ALERT_RULE_COLUMNS
            ))?;
            let rows = stmt.query_map([], alert_rule_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn get_alert_rule(&self, id: Uuid) -> Result<Option<AlertRule>, StorageError> {
        let id = id.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM alert_rules WHERE id = ?",
                ALERT_RULE_COLUMNS
            ))?;
            let mut rows = stmt.query_map(duckdb::params![id], alert_rule_from_row)?;
            Ok(rows.next().transpose()?)
        })
        .await
    }

    async fn save_alert_rule(&self, rule: &AlertRule) -> Result<(), StorageError> {
        let rule = rule.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO alert_rules
                    (id, name, frequency, last_run, is_active, min_log_level, lookback_minutes, recipients)
                 VALUES (?, ?, ?, to_timestamp(? / 1000000.0), ?, ?, ?, ?)",
                duckdb::params![
                    rule.id.to_string(),
                    rule.name,
                    rule.frequency,
                    rule.last_run.map(|t| t.timestamp_micros()),
                    rule.is_active,
                    rule.min_log_level,
                    rule.lookback_minutes,
                    rule.recipients,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn mark_alert_rule_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        let id = id.to_string();
        let at_micros = at.timestamp_micros();

        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE alert_rules SET last_run = to_timestamp(? / 1000000.0) WHERE id = ?",
                duckdb::params![at_micros, id],
            )?;
            Ok(())
        })
        .await
    }

    async fn count_logs_since(
        &self,
        min_log_level: i64,
        since: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let since_micros = since.timestamp_micros();

        self.with_conn(move |conn| {
            let count = conn.query_row(
                "SELECT count(*) FROM logs
                 WHERE log_level >= ? AND log_date >= to_timestamp(? / 1000000.0)",
                duckdb::params![min_log_level, since_micros],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    async fn record_alert_event(&self, event: &AlertEvent) -> Result<(), StorageError> {
        let event = event.clone();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO alert_events (rule_id, created_on, match_count)
                 VALUES (?, to_timestamp(? / 1000000.0), ?)",
                duckdb::params![
                    event.rule_id.to_string(),
                    event.created_on.timestamp_micros(),
                    event.match_count,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

impl DuckDbStorage {
    pub async fn count_alert_events(&self, rule_id: Uuid) -> Result<i64, StorageError> {
        let rule_id = rule_id.to_string();

        self.with_conn(move |conn| {
            let count = conn.query_row(
                "SELECT count(*) FROM alert_events WHERE rule_id = ?",
                duckdb::params![rule_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }
}
