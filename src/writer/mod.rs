//! Persists canonical record batches into the normalized target store.

mod plan;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::checkout::{RangeCheckout, RangeError};
use crate::pipeline::{FeedbackSender, RecordReceiver};
use crate::record::{CanonicalRecord, FeedbackInstruction};
use crate::storage::{StorageError, TargetStore};
use crate::worker::{Worker, WorkerError};

pub use plan::{DimRef, PlanError, WritePlan};

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("range error: {0}")]
    Range(#[from] RangeError),
}

/// Drains the record queue, writes each batch and emits feedback for the remover.
pub struct EntityWriter {
    target: Arc<dyn TargetStore>,
    records: RecordReceiver,
    feedback: FeedbackSender,
    range: Option<RangeCheckout>,
    delete_original: bool,
}

impl EntityWriter {
    pub fn new(
        target: Arc<dyn TargetStore>,
        records: RecordReceiver,
        feedback: FeedbackSender,
        range: Option<RangeCheckout>,
        delete_original: bool,
    ) -> Self {
        Self {
            target,
            records,
            feedback,
            range,
            delete_original,
        }
    }

    /// Batches waiting in the record queue.
    pub fn pending_batches(&self) -> usize {
        self.records.len()
    }

    /// Write every queued batch. Returns the number of records written.
    ///
    /// A batch that fails to write is dropped; its broker rows and range stay
    /// claimed and are recovered by the next startup reset.
    pub async fn drain(&mut self) -> Result<usize, WriterError> {
        let queued = self.records.len();
        if queued > 0 {
            debug!(batches = queued, "Writing queued batches");
        }

        let mut written = 0;
        while let Some(batch) = self.records.dequeue() {
            if batch.is_empty() {
                continue;
            }
            written += self.write_batch(batch).await?;
        }
        Ok(written)
    }

    /// Two-phase write of one batch, then feedback and range completion.
    pub async fn write_batch(&self, batch: Vec<CanonicalRecord>) -> Result<usize, WriterError> {
        let plan = self.plan(batch).await?;
        let count = plan.len();

        let (host_ids, master_data_ids) = self
            .target
            .insert_dimensions(plan.pending_hosts(), plan.pending_master_data())
            .await?;
        let new_hosts = host_ids.len();
        let new_master_data = master_data_ids.len();

        let (rows, records) = plan.resolve(&host_ids, &master_data_ids, Utc::now())?;
        self.target.insert_logs(&rows).await?;

        info!(count, new_hosts, new_master_data, "Wrote log batch");

        let instructions = records
            .iter()
            .map(|record| FeedbackInstruction::for_record(record, self.delete_original));
        if !self.feedback.enqueue_all(instructions) {
            warn!(count, "Remover queue closed, source rows wait for the startup reset");
        }

        // Only the highest position can be the range's high-water mark.
        let high_water = records.iter().filter_map(CanonicalRecord::range_position).max();
        if let (Some(range), Some(position)) = (&self.range, high_water) {
            if let Err(e) = range.confirm_written(position).await {
                error!(position, error = %e, "Failed to complete range");
                return Err(e.into());
            }
        }

        Ok(count)
    }

    async fn plan(&self, batch: Vec<CanonicalRecord>) -> Result<WritePlan, WriterError> {
        let mut plan = WritePlan::new();

        for record in batch {
            let host_key = record.host_key();
            let host = match plan.host_ref(&host_key) {
                Some(dim_ref) => dim_ref,
                None => {
                    let stored = self.target.find_host(&host_key).await?;
                    plan.add_host(host_key, stored)
                }
            };

            let md_key = record.master_data_key();
            let master_data = match plan.master_data_ref(&md_key) {
                Some(dim_ref) => dim_ref,
                None => {
                    let stored = self.target.find_master_data(&md_key).await?;
                    plan.add_master_data(md_key, stored)
                }
            };

            plan.push_log(record, host, master_data);
        }

        Ok(plan)
    }
}

#[async_trait]
impl Worker for EntityWriter {
    fn name(&self) -> &'static str {
        "writer"
    }

    async fn run_once(&mut self) -> Result<(), WorkerError> {
        self.drain().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::create_queue;
    use crate::record::SourceTag;
    use crate::storage::{CursorStatus, DuckDbStorage, FuvLogRow, RangeStore};

    fn record(host: &str, function: &str) -> CanonicalRecord {
        let mut record = CanonicalRecord::new(SourceTag::EventLog, Utc::now());
        record.host = Some(host.to_string());
        record.system = Some("Forras".to_string());
        record.function = Some(function.to_string());
        record.broker_row_id = Some(1);
        record.external_id = Some("10".to_string());
        record
    }

    async fn storage() -> Arc<DuckDbStorage> {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_schema().await.unwrap();
        Arc::new(storage)
    }

    #[tokio::test]
    async fn test_new_dimension_shared_within_batch_resolves() {
        let storage = storage().await;
        let (_, records) = create_queue();
        let (feedback_tx, mut feedback) = create_queue();
        let writer = EntityWriter::new(storage.clone(), records, feedback_tx, None, true);

        let batch = vec![record("H-new", "F1"), record("H-new", "F1"), record("H-other", "F2")];
        let ids: Vec<_> = batch.iter().map(|r| r.unique_id).collect();
        assert_eq!(writer.write_batch(batch).await.unwrap(), 3);

        let first = storage.get_log(ids[0]).await.unwrap().unwrap();
        let second = storage.get_log(ids[1]).await.unwrap().unwrap();
        let third = storage.get_log(ids[2]).await.unwrap().unwrap();

        assert_eq!(first.host_id, second.host_id);
        assert_eq!(first.master_data_id, second.master_data_id);
        assert_ne!(first.host_id, third.host_id);
        for row in [&first, &second, &third] {
            assert!(storage.host_exists(row.host_id).await.unwrap());
            assert!(storage.master_data_exists(row.master_data_id).await.unwrap());
        }

        let instructions = feedback.drain_up_to(10);
        assert_eq!(instructions.len(), 3);
        assert!(instructions.iter().all(|i| i.delete_original && i.broker_row_id == Some(1)));
    }

    #[tokio::test]
    async fn test_dimensions_are_reused_across_batches() {
        let storage = storage().await;
        let (_, records) = create_queue();
        let (feedback, _) = create_queue();
        let writer = EntityWriter::new(storage.clone(), records, feedback, None, false);

        let a = record("H1", "F1");
        let b = record("H1", "F1");
        let (a_id, b_id) = (a.unique_id, b.unique_id);
        writer.write_batch(vec![a]).await.unwrap();
        writer.write_batch(vec![b]).await.unwrap();

        let a = storage.get_log(a_id).await.unwrap().unwrap();
        let b = storage.get_log(b_id).await.unwrap().unwrap();
        assert_eq!(a.host_id, b.host_id);
        assert_eq!(a.master_data_id, b.master_data_id);
    }

    #[tokio::test]
    async fn test_drain_writes_every_queued_batch() {
        let storage = storage().await;
        let (records, records_rx) = create_queue();
        let (feedback_tx, mut feedback) = create_queue();
        let mut writer = EntityWriter::new(storage.clone(), records_rx, feedback_tx, None, false);

        records.enqueue(vec![record("H1", "F1")]);
        records.enqueue(Vec::new());
        records.enqueue(vec![record("H2", "F1"), record("H1", "F2")]);
        assert_eq!(writer.pending_batches(), 3);

        assert_eq!(writer.drain().await.unwrap(), 3);
        assert_eq!(writer.pending_batches(), 0);
        assert_eq!(storage.count_logs().await.unwrap(), 3);
        assert_eq!(feedback.len(), 3);
        assert!(feedback.dequeue().is_some_and(|i| !i.delete_original));
    }

    #[tokio::test]
    async fn test_high_water_record_completes_range() {
        let storage = storage().await;
        for id in 1..=3 {
            storage
                .insert_fuv_log(&FuvLogRow {
                    id,
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let range = RangeCheckout::new(storage.clone(), "W1");
        let claim = range.claim(10).await.unwrap().unwrap();
        range.mark_in_writer_queue().await.unwrap();

        let (_, records) = create_queue();
        let (feedback, _) = create_queue();
        let writer = EntityWriter::new(storage.clone(), records, feedback, Some(range), false);
        let fuv = |id: i64| {
            let mut r = CanonicalRecord::new(SourceTag::FuvLog, Utc::now());
            r.external_id = Some(id.to_string());
            r
        };

        writer.write_batch(vec![fuv(2), fuv(1)]).await.unwrap();
        let cursor = storage.load_cursor("W1").await.unwrap().unwrap();
        assert_eq!(cursor.status(), Some(CursorStatus::InWriterQueue));

        // The high-water record need not be last in its batch.
        writer.write_batch(vec![fuv(claim.range_to), fuv(1)]).await.unwrap();
        let cursor = storage.load_cursor("W1").await.unwrap().unwrap();
        assert_eq!(cursor.status(), Some(CursorStatus::Processed));
    }
}
