use super::{delete_original_row, opt_timestamp_at, placeholders, timestamp_at, DuckDbStorage};
use crate::record::{OriginDatabase, OriginalTable, SourceTag};
use crate::storage::traits::{BrokerRow, BrokerStatus, SourceStore, StorageError, UpstreamRow};
use async_trait::async_trait;
use duckdb::types::Value;

pub(super) fn broker_row_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<BrokerRow> {
    let code: i64 = row.get(2)?;
    let status = BrokerStatus::from_code(code).ok_or_else(|| {
        super::conversion_error(2, duckdb::types::Type::BigInt, "unknown broker status")
    })?;

    Ok(BrokerRow {
        id: row.get(0)?,
        payload: row.get(1)?,
        status,
        owner_id: row.get(3)?,
        modify_date: timestamp_at(4, row.get(4)?)?,
    })
}

/// `ids` followed by `trailing`, as positional values.
fn id_values(ids: &[i64], trailing: Option<&str>) -> Vec<Value> {
    let mut values: Vec<Value> = ids.iter().map(|id| Value::BigInt(*id)).collect();
    if let Some(text) = trailing {
        values.push(Value::Text(text.to_string()));
    }
    values
}

#[async_trait]
impl SourceStore for DuckDbStorage {
    async fn claim_broker_rows(
        &self,
        max_count: usize,
        owner_id: &str,
    ) -> Result<Vec<BrokerRow>, StorageError> {
        let owner_id = owner_id.to_string();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "UPDATE broker_rows
                 SET status = ?, owner_id = ?, modify_date = current_timestamp
                 WHERE id IN (
                     SELECT id FROM broker_rows WHERE status = ? ORDER BY id LIMIT ?
                 )",
                duckdb::params![
                    BrokerStatus::UnderProcess.code(),
                    owner_id,
                    BrokerStatus::Available.code(),
                    max_count as i64,
                ],
            )?;

            let claimed = {
                let mut stmt = tx.prepare(
                    "SELECT id, payload, status, owner_id, epoch_us(modify_date)
                     FROM broker_rows
                     WHERE owner_id = ? AND status = ?
                     ORDER BY id",
                )?;
                let rows = stmt.query_map(
                    duckdb::params![owner_id, BrokerStatus::UnderProcess.code()],
                    broker_row_from_row,
                )?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            tx.commit()?;
            Ok(claimed)
        })
        .await
    }

    async fn reset_broker_rows(&self, owner_id: &str) -> Result<usize, StorageError> {
        let owner_id = owner_id.to_string();

        self.with_conn(move |conn| {
            let reset = conn.execute(
                "UPDATE broker_rows
                 SET status = ?, owner_id = NULL, modify_date = current_timestamp
                 WHERE owner_id = ?",
                duckdb::params![BrokerStatus::Available.code(), owner_id],
            )?;
            Ok(reset)
        })
        .await
    }

    async fn mark_broker_rows_processed(
        &self,
        ids: &[i64],
        owner_id: &str,
    ) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut values = vec![Value::BigInt(BrokerStatus::Processed.code())];
        values.extend(id_values(ids, Some(owner_id)));
        let sql = format!(
            "UPDATE broker_rows
             SET status = ?, modify_date = current_timestamp
             WHERE id IN ({}) AND owner_id = ?",
            placeholders(ids.len())
        );

        self.with_conn(move |conn| {
            let updated = conn.execute(&sql, duckdb::params_from_iter(values))?;
            Ok(updated)
        })
        .await
    }

    async fn delete_owned_broker_rows(
        &self,
        ids: &[i64],
        owner_id: &str,
    ) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let values = id_values(ids, Some(owner_id));
        let sql = format!(
            "DELETE FROM broker_rows WHERE id IN ({}) AND owner_id = ?",
            placeholders(ids.len())
        );

        self.with_conn(move |conn| {
            let deleted = conn.execute(&sql, duckdb::params_from_iter(values))?;
            Ok(deleted)
        })
        .await
    }

    async fn delete_broker_rows(&self, ids: &[i64]) -> Result<usize, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let values = id_values(ids, None);
        let sql = format!(
            "DELETE FROM broker_rows WHERE id IN ({})",
            placeholders(ids.len())
        );

        self.with_conn(move |conn| {
            let deleted = conn.execute(&sql, duckdb::params_from_iter(values))?;
            Ok(deleted)
        })
        .await
    }

    async fn fetch_upstream(
        &self,
        tag: SourceTag,
        forras_id: i64,
    ) -> Result<Option<UpstreamRow>, StorageError> {
        let table = tag.original_table();
        if table.database != OriginDatabase::Install {
            return Ok(None);
        }

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT forras_id, related_id, epoch_us(log_date), client_app, host, session_id,
                        assembly_name, assembly_info, function_name, log_level, correlation_id,
                        user_data, message, input_values, output_values, additional_data
                 FROM {} WHERE forras_id = ?",
                table.table
            ))?;

            let mut rows = stmt.query_map(duckdb::params![forras_id], |row| {
                Ok(UpstreamRow {
                    forras_id: row.get(0)?,
                    related_id: row.get(1)?,
                    log_date: opt_timestamp_at(2, row.get(2)?)?,
                    client_app: row.get(3)?,
                    host: row.get(4)?,
                    session: row.get(5)?,
                    assembly_name: row.get(6)?,
                    assembly_info: row.get(7)?,
                    function: row.get(8)?,
                    log_level: row.get(9)?,
                    correlation_id: row.get(10)?,
                    user_data: row.get(11)?,
                    message: row.get(12)?,
                    input_values: row.get(13)?,
                    output_values: row.get(14)?,
                    additional_data: row.get(15)?,
                })
            })?;

            Ok(rows.next().transpose()?)
        })
        .await
    }

    async fn delete_original(&self, table: OriginalTable, key: i64) -> Result<usize, StorageError> {
        delete_original_row(self, table, key).await
    }
}
