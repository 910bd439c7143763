//! Deletes source data once the writer has persisted it.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::checkout::FINALIZE_BATCH_SIZE;
use crate::pipeline::FeedbackReceiver;
use crate::record::{FeedbackInstruction, OriginDatabase};
use crate::storage::{RangeStore, SourceStore, StorageError};
use crate::worker::{Worker, WorkerError};

#[derive(Debug, Error)]
pub enum RemoverError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    pub instructions: usize,
    pub broker_rows: usize,
    pub originals: usize,
    pub skipped: usize,
}

pub struct DataRemover {
    source: Arc<dyn SourceStore>,
    fuv: Option<Arc<dyn RangeStore>>,
    feedback: FeedbackReceiver,
    max_batch: usize,
}

/// Upstream key of an external id. App-calls ids carry a `(related)` suffix.
pub fn original_key(external_id: &str) -> Option<i64> {
    let key = match external_id.find('(') {
        Some(idx) => &external_id[..idx],
        None => external_id,
    };
    key.trim().parse().ok()
}

impl DataRemover {
    pub fn new(
        source: Arc<dyn SourceStore>,
        fuv: Option<Arc<dyn RangeStore>>,
        feedback: FeedbackReceiver,
        max_batch: usize,
    ) -> Self {
        Self {
            source,
            fuv,
            feedback,
            max_batch,
        }
    }

    /// Process up to `max_batch` queued instructions.
    pub async fn run_cycle(&mut self) -> Result<RemovalReport, RemoverError> {
        let batch = self.feedback.drain_up_to(self.max_batch);
        let mut report = RemovalReport {
            instructions: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let mut broker_ids: Vec<i64> = batch.iter().filter_map(|i| i.broker_row_id).collect();
        broker_ids.sort_unstable();
        broker_ids.dedup();
        for chunk in broker_ids.chunks(FINALIZE_BATCH_SIZE) {
            report.broker_rows += self.source.delete_broker_rows(chunk).await?;
        }

        for instruction in batch.iter().filter(|i| i.delete_original) {
            match self.delete_original(instruction).await? {
                Some(deleted) => report.originals += deleted,
                None => report.skipped += 1,
            }
        }

        info!(
            instructions = report.instructions,
            broker_rows = report.broker_rows,
            originals = report.originals,
            "Removed logged data"
        );
        Ok(report)
    }

    async fn delete_original(
        &self,
        instruction: &FeedbackInstruction,
    ) -> Result<Option<usize>, RemoverError> {
        let table = instruction.source.original_table();
        let Some(key) = instruction.external_id.as_deref().and_then(original_key) else {
            debug!(
                table = %table,
                external_id = ?instruction.external_id,
                "No usable original key, skipping"
            );
            return Ok(None);
        };

        let deleted = match table.database {
            OriginDatabase::Install => self.source.delete_original(table, key).await?,
            OriginDatabase::Fuv => match &self.fuv {
                Some(fuv) => fuv.delete_original(table, key).await?,
                None => {
                    debug!(table = %table, key, "Range source not configured, skipping");
                    return Ok(None);
                }
            },
        };

        if deleted == 0 {
            debug!(table = %table, key, "Original already removed");
        }
        Ok(Some(deleted))
    }
}

#[async_trait]
impl Worker for DataRemover {
    fn name(&self) -> &'static str {
        "remover"
    }

    async fn run_once(&mut self) -> Result<(), WorkerError> {
        self.run_cycle().await?;
        Ok(())
    }
}
