use super::{delete_original_row, opt_timestamp_at, DuckDbStorage};
use crate::record::OriginalTable;
use crate::storage::traits::{
    CursorStatus, FuvLogRow, RangeClaim, RangeCursor, RangeStore, StorageError,
};
use async_trait::async_trait;

#[async_trait]
impl RangeStore for DuckDbStorage {
    async fn load_cursor(&self, owner_id: &str) -> Result<Option<RangeCursor>, StorageError> {
        let owner_id = owner_id.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT owner_id, range_from, range_to, status
                 FROM range_cursors WHERE owner_id = ?",
            )?;
            let mut rows = stmt.query_map(duckdb::params![owner_id], |row| {
                Ok(RangeCursor {
                    owner_id: row.get(0)?,
                    range_from: row.get(1)?,
                    range_to: row.get(2)?,
                    status_code: row.get(3)?,
                })
            })?;
            Ok(rows.next().transpose()?)
        })
        .await
    }

    async fn claim_next_range(
        &self,
        owner_id: &str,
        max_count: usize,
    ) -> Result<Option<RangeClaim>, StorageError> {
        let owner_id = owner_id.to_string();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let last_to: Option<i64> =
                tx.query_row("SELECT max(range_to) FROM range_cursors", [], |row| row.get(0))?;
            let start = last_to.map(|to| to + 1).unwrap_or(0);

            let ids = {
                let mut stmt =
                    tx.prepare("SELECT id FROM fuv_log WHERE id >= ? ORDER BY id LIMIT ?")?;
                let rows = stmt.query_map(duckdb::params![start, max_count as i64], |row| {
                    row.get::<_, i64>(0)
                })?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            let (range_from, range_to) = match (ids.first(), ids.last()) {
                (Some(first), Some(last)) => (*first, *last),
                _ => return Ok(None),
            };

            let updated = tx.execute(
                "UPDATE range_cursors SET range_from = ?, range_to = ?, status = ? WHERE owner_id = ?",
                duckdb::params![
                    range_from,
                    range_to,
                    CursorStatus::UnderProcess.code(),
                    owner_id
                ],
            )?;
            if updated == 0 {
                tx.execute(
                    "INSERT INTO range_cursors (owner_id, range_from, range_to, status)
                     VALUES (?, ?, ?, ?)",
                    duckdb::params![
                        owner_id,
                        range_from,
                        range_to,
                        CursorStatus::UnderProcess.code()
                    ],
                )?;
            }

            tx.commit()?;
            Ok(Some(RangeClaim {
                range_from,
                range_to,
                ids,
            }))
        })
        .await
    }

    async fn ids_in_range(&self, range_from: i64, range_to: i64) -> Result<Vec<i64>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT id FROM fuv_log WHERE id >= ? AND id <= ? ORDER BY id")?;
            let rows = stmt.query_map(duckdb::params![range_from, range_to], |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn transition_cursor(
        &self,
        owner_id: &str,
        from: CursorStatus,
        to: CursorStatus,
    ) -> Result<bool, StorageError> {
        let owner_id = owner_id.to_string();

        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE range_cursors SET status = ? WHERE owner_id = ? AND status = ?",
                duckdb::params![to.code(), owner_id, from.code()],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn shrink_range(&self, owner_id: &str, range_to: i64) -> Result<bool, StorageError> {
        let owner_id = owner_id.to_string();

        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE range_cursors SET range_to = ?
                 WHERE owner_id = ? AND status = ? AND range_to > ? AND range_from <= ?",
                duckdb::params![
                    range_to,
                    owner_id,
                    CursorStatus::UnderProcess.code(),
                    range_to,
                    range_to
                ],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn complete_range(&self, owner_id: &str, range_to: i64) -> Result<bool, StorageError> {
        let owner_id = owner_id.to_string();

        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE range_cursors SET status = ?
                 WHERE owner_id = ? AND status = ? AND range_to = ?",
                duckdb::params![
                    CursorStatus::Processed.code(),
                    owner_id,
                    CursorStatus::InWriterQueue.code(),
                    range_to
                ],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn fetch_fuv_log(&self, id: i64) -> Result<Option<FuvLogRow>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_status_id, status, error, epoch_us(log_date), module_name,
                        function_name, message, input_values
                 FROM fuv_log WHERE id = ?",
            )?;
            let mut rows = stmt.query_map(duckdb::params![id], |row| {
                Ok(FuvLogRow {
                    id: row.get(0)?,
                    task_status_id: row.get(1)?,
                    status: row.get(2)?,
                    error: row.get(3)?,
                    log_date: opt_timestamp_at(4, row.get(4)?)?,
                    module: row.get(5)?,
                    function: row.get(6)?,
                    message: row.get(7)?,
                    input_values: row.get(8)?,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SourceTag;

    async fn setup_storage(ids: impl IntoIterator<Item = i64>) -> DuckDbStorage {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_range_schema().await.unwrap();
        for id in ids {
            storage
                .insert_fuv_log(&FuvLogRow {
                    id,
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        storage
    }

    #[tokio::test]
    async fn test_first_claim_starts_at_lowest_id() {
        let storage = setup_storage(101..=150).await;

        let claim = storage.claim_next_range("w1", 30).await.unwrap().unwrap();
        assert_eq!(claim.range_from, 101);
        assert_eq!(claim.range_to, 130);
        assert_eq!(claim.ids.len(), 30);

        let cursor = storage.load_cursor("w1").await.unwrap().unwrap();
        assert_eq!(cursor.status(), Some(CursorStatus::UnderProcess));
        assert_eq!((cursor.range_from, cursor.range_to), (101, 130));
    }

    #[tokio::test]
    async fn test_claims_never_overlap_across_owners() {
        let storage = setup_storage(1..=10).await;

        let first = storage.claim_next_range("w1", 4).await.unwrap().unwrap();
        let second = storage.claim_next_range("w2", 4).await.unwrap().unwrap();
        assert_eq!((first.range_from, first.range_to), (1, 4));
        assert_eq!((second.range_from, second.range_to), (5, 8));
    }

    #[tokio::test]
    async fn test_claim_with_nothing_new_leaves_cursor_untouched() {
        let storage = setup_storage(Vec::new()).await;

        assert!(storage.claim_next_range("w1", 10).await.unwrap().is_none());
        assert!(storage.load_cursor("w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_range_requires_matching_end() {
        let storage = setup_storage(1..=5).await;
        storage.claim_next_range("w1", 5).await.unwrap();
        assert!(storage
            .transition_cursor("w1", CursorStatus::UnderProcess, CursorStatus::InWriterQueue)
            .await
            .unwrap());

        assert!(!storage.complete_range("w1", 4).await.unwrap());
        assert!(storage.complete_range("w1", 5).await.unwrap());
        assert!(!storage.complete_range("w1", 5).await.unwrap());

        let cursor = storage.load_cursor("w1").await.unwrap().unwrap();
        assert_eq!(cursor.status(), Some(CursorStatus::Processed));
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let storage = setup_storage(1..=2).await;
        storage.claim_next_range("w1", 2).await.unwrap();

        let moved = storage
            .transition_cursor("w1", CursorStatus::InWriterQueue, CursorStatus::UnderProcess)
            .await
            .unwrap();
        assert!(!moved);
    }

    #[tokio::test]
    async fn test_shrink_range_only_lowers_claimed_cursor() {
        let storage = setup_storage(1..=5).await;
        storage.claim_next_range("w1", 5).await.unwrap();

        assert!(!storage.shrink_range("w1", 5).await.unwrap());
        assert!(storage.shrink_range("w1", 4).await.unwrap());
        let cursor = storage.load_cursor("w1").await.unwrap().unwrap();
        assert_eq!((cursor.range_from, cursor.range_to), (1, 4));

        storage
            .transition_cursor("w1", CursorStatus::UnderProcess, CursorStatus::InWriterQueue)
            .await
            .unwrap();
        assert!(!storage.shrink_range("w1", 3).await.unwrap());
        assert!(storage.complete_range("w1", 4).await.unwrap());
    }

    #[tokio::test]
    async fn test_ids_in_range_and_delete() {
        let storage = setup_storage([3, 5, 9]).await;
        assert_eq!(storage.ids_in_range(3, 5).await.unwrap(), vec![3, 5]);

        let table = SourceTag::FuvLog.original_table();
        assert_eq!(storage.delete_original(table, 5).await.unwrap(), 1);
        assert!(storage.fetch_fuv_log(5).await.unwrap().is_none());
        assert!(storage.fetch_fuv_log(9).await.unwrap().is_some());
    }
}
