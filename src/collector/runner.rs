use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::payload::BrokerPayload;
use crate::checkout::{BrokerCheckout, CheckoutError, RangeCheckout, RangeError};
use crate::convert::{ConvertError, ConverterRegistry};
use crate::pipeline::RecordSender;
use crate::record::{CanonicalRecord, SourceTag};
use crate::storage::{BrokerRow, RangeClaim, StorageError};
use crate::worker::{Worker, WorkerError};

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    #[error("range error: {0}")]
    Range(#[from] RangeError),
}

/// Per-row result of a collection cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Fully converted; marked processed.
    pub succeeded: Vec<i64>,
    /// Malformed payload or unsupported source; deleted.
    pub failed: Vec<i64>,
    /// Referenced upstream row is gone; deleted.
    pub invalid: Vec<i64>,
    /// Payload listed no records; deleted.
    pub empty: Vec<i64>,
    /// Storage trouble while converting; left claimed for the next cycle.
    pub deferred: Vec<i64>,
    pub enqueued_records: usize,
    pub range_enqueued: bool,
}

enum RowOutcome {
    Converted(Vec<CanonicalRecord>),
    Empty,
    Failed(ConvertError),
    Invalid(ConvertError),
    Deferred(StorageError),
}

impl From<ConvertError> for RowOutcome {
    fn from(e: ConvertError) -> Self {
        match e {
            ConvertError::MissingReference { .. } => RowOutcome::Invalid(e),
            ConvertError::Storage(e) => RowOutcome::Deferred(e),
            ConvertError::Malformed(_) | ConvertError::UnsupportedSource(_) => RowOutcome::Failed(e),
        }
    }
}

/// Claims work for one worker identity, converts it and feeds the record queue.
pub struct LogCollector {
    broker: BrokerCheckout,
    range: Option<RangeCheckout>,
    converters: ConverterRegistry,
    records: RecordSender,
    max_rows_per_cycle: usize,
}

impl LogCollector {
    pub fn new(
        broker: BrokerCheckout,
        range: Option<RangeCheckout>,
        converters: ConverterRegistry,
        records: RecordSender,
        max_rows_per_cycle: usize,
    ) -> Self {
        Self {
            broker,
            range,
            converters,
            records,
            max_rows_per_cycle,
        }
    }

    /// Return rows and the range cursor left behind by a crashed run to a claimable state.
    pub async fn reset_stuck(&self) -> Result<(), CollectorError> {
        info!(owner = %self.broker.owner_id(), "Resetting stuck log entries");
        self.broker.reset_stuck().await?;
        if let Some(range) = &self.range {
            range.reset_stuck().await?;
        }
        Ok(())
    }

    /// One collection cycle: claim, convert, enqueue, then finalize the broker rows.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, CollectorError> {
        let range_claim = match &self.range {
            Some(range) => range.claim(self.max_rows_per_cycle).await?,
            None => None,
        };
        let rows = self.broker.claim(self.max_rows_per_cycle).await?;

        if rows.is_empty() && range_claim.is_none() {
            debug!("No new log data");
            return Ok(CycleOutcome::default());
        }

        let mut outcome = CycleOutcome::default();
        let mut batch = Vec::new();

        for row in &rows {
            match self.convert_row(row).await {
                RowOutcome::Converted(records) => {
                    outcome.succeeded.push(row.id);
                    batch.extend(records);
                }
                RowOutcome::Empty => {
                    debug!(row_id = row.id, "Broker row lists no records");
                    outcome.empty.push(row.id);
                }
                RowOutcome::Failed(e) => {
                    error!(row_id = row.id, payload = ?row.payload, error = %e, "Failed to convert broker row");
                    outcome.failed.push(row.id);
                }
                RowOutcome::Invalid(e) => {
                    warn!(row_id = row.id, error = %e, "Broker row references missing data");
                    outcome.invalid.push(row.id);
                }
                RowOutcome::Deferred(e) => {
                    error!(row_id = row.id, error = %e, "Storage error while converting broker row, leaving it claimed");
                    outcome.deferred.push(row.id);
                }
            }
        }

        if let (Some(range), Some(claim)) = (&self.range, range_claim) {
            match self.convert_range(&claim).await {
                Ok(mut records) => match range.mark_in_writer_queue().await {
                    Ok(true) => {
                        records.sort_by_key(|r| r.range_position());
                        batch.extend(records);
                        outcome.range_enqueued = true;
                    }
                    Ok(false) => warn!(
                        from = claim.range_from,
                        to = claim.range_to,
                        "Range cursor moved during conversion, dropping range records"
                    ),
                    Err(e) => error!(error = %e, "Failed to hand range to writer queue"),
                },
                Err(e) => error!(
                    from = claim.range_from,
                    to = claim.range_to,
                    error = %e,
                    "Failed to convert range, will retry on next claim"
                ),
            }
        }

        if !batch.is_empty() {
            outcome.enqueued_records = batch.len();
            if self.records.enqueue(batch) {
                debug!(count = outcome.enqueued_records, "Enqueued records for writer");
            } else {
                warn!(
                    count = outcome.enqueued_records,
                    "Writer queue closed, records wait for the startup reset"
                );
            }
        }

        if !outcome.succeeded.is_empty() {
            self.broker.mark_processed(&outcome.succeeded).await?;
        }

        let disposable: Vec<i64> = outcome
            .failed
            .iter()
            .chain(&outcome.invalid)
            .chain(&outcome.empty)
            .copied()
            .collect();
        if !disposable.is_empty() {
            self.broker.delete(&disposable).await?;
        }

        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            invalid = outcome.invalid.len(),
            deferred = outcome.deferred.len(),
            records = outcome.enqueued_records,
            "Collection cycle finished"
        );
        Ok(outcome)
    }

    async fn convert_row(&self, row: &BrokerRow) -> RowOutcome {
        let raw = match row.payload.as_deref() {
            Some(raw) => raw,
            None => return RowOutcome::Failed(ConvertError::Malformed("payload is null".to_string())),
        };

        let payload = match BrokerPayload::parse(raw) {
            Ok(payload) => payload,
            Err(e) => return RowOutcome::Failed(ConvertError::Malformed(e.to_string())),
        };

        if payload.data.is_empty() {
            return RowOutcome::Empty;
        }

        let (_, converter) = match self.converters.for_code(payload.source) {
            Ok(found) => found,
            Err(e) => return e.into(),
        };

        let relational_id = Uuid::new_v4();
        let mut records = Vec::with_capacity(payload.data.len());
        for item in &payload.data {
            match converter.convert(item.id, relational_id).await {
                Ok(mut record) => {
                    record.broker_row_id = Some(row.id);
                    records.push(record);
                }
                Err(e) => return e.into(),
            }
        }

        RowOutcome::Converted(records)
    }

    async fn convert_range(&self, claim: &RangeClaim) -> Result<Vec<CanonicalRecord>, ConvertError> {
        let converter = self
            .converters
            .get(SourceTag::FuvLog)
            .ok_or(ConvertError::UnsupportedSource(SourceTag::FuvLog.code()))?;

        let relational_id = Uuid::new_v4();
        let mut records = Vec::with_capacity(claim.ids.len());
        for id in &claim.ids {
            records.push(converter.convert(*id, relational_id).await?);
        }
        Ok(records)
    }
}

#[async_trait]
impl Worker for LogCollector {
    fn name(&self) -> &'static str {
        "collector"
    }

    async fn startup(&mut self) -> Result<(), WorkerError> {
        Ok(self.reset_stuck().await?)
    }

    async fn run_once(&mut self) -> Result<(), WorkerError> {
        self.run_cycle().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{create_queue, RecordReceiver};
    use crate::storage::{
        BrokerStatus, CursorStatus, DuckDbStorage, FuvLogRow, RangeStore, UpstreamRow,
    };
    use std::sync::Arc;

    struct Fixture {
        storage: Arc<DuckDbStorage>,
        queue: RecordReceiver,
        collector: LogCollector,
    }

    async fn fixture(with_range: bool) -> Fixture {
        let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
        storage.init_schema().await.unwrap();

        for id in 1..=3 {
            storage
                .insert_upstream_row(
                    SourceTag::EventLog,
                    &UpstreamRow {
                        forras_id: id,
                        host: Some("srv".to_string()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let (sender, queue) = create_queue();
        let range_store: Option<Arc<dyn RangeStore>> = if with_range {
            Some(storage.clone() as Arc<dyn RangeStore>)
        } else {
            None
        };
        let collector = LogCollector::new(
            BrokerCheckout::new(storage.clone(), "W1"),
            range_store.clone().map(|s| RangeCheckout::new(s, "W1")),
            ConverterRegistry::standard(storage.clone(), range_store),
            sender,
            100,
        );

        Fixture {
            storage,
            queue,
            collector,
        }
    }

    async fn status(storage: &DuckDbStorage, id: i64) -> Option<BrokerStatus> {
        storage.get_broker_row(id).await.unwrap().map(|r| r.status)
    }

    #[tokio::test]
    async fn test_nothing_to_do() {
        let f = fixture(true).await;
        let outcome = f.collector.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::default());
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_successful_row_is_enqueued_and_marked_processed() {
        let mut f = fixture(false).await;
        let id = f
            .storage
            .insert_broker_row(Some(r#"{"Source":1,"Data":[{"Id":1},{"Id":2}]}"#))
            .await
            .unwrap();

        let outcome = f.collector.run_cycle().await.unwrap();
        assert_eq!(outcome.succeeded, vec![id]);
        assert_eq!(outcome.enqueued_records, 2);

        let batch = f.queue.dequeue().unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|r| r.broker_row_id == Some(id)));
        assert_eq!(batch[0].correlation_id, batch[1].correlation_id);
        assert_eq!(status(&f.storage, id).await, Some(BrokerStatus::Processed));
    }

    #[tokio::test]
    async fn test_broken_rows_are_classified_and_deleted() {
        let f = fixture(false).await;
        let malformed = f.storage.insert_broker_row(Some("{not json")).await.unwrap();
        let null = f.storage.insert_broker_row(None).await.unwrap();
        let missing = f
            .storage
            .insert_broker_row(Some(r#"{"Source":1,"Data":[{"Id":1},{"Id":404}]}"#))
            .await
            .unwrap();
        let unsupported = f
            .storage
            .insert_broker_row(Some(r#"{"Source":0,"Data":[{"Id":1}]}"#))
            .await
            .unwrap();
        let empty = f
            .storage
            .insert_broker_row(Some(r#"{"Source":1,"Data":[]}"#))
            .await
            .unwrap();

        let outcome = f.collector.run_cycle().await.unwrap();
        assert_eq!(outcome.failed, vec![malformed, null, unsupported]);
        assert_eq!(outcome.invalid, vec![missing]);
        assert_eq!(outcome.empty, vec![empty]);
        assert!(outcome.succeeded.is_empty());
        assert!(f.queue.is_empty());

        for id in [malformed, null, missing, unsupported, empty] {
            assert_eq!(status(&f.storage, id).await, None);
        }
    }

    #[tokio::test]
    async fn test_range_records_follow_broker_records_in_id_order() {
        let mut f = fixture(true).await;
        for id in [12, 10, 11] {
            f.storage
                .insert_fuv_log(&FuvLogRow {
                    id,
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        f.storage
            .insert_broker_row(Some(r#"{"Source":1,"Data":[{"Id":3}]}"#))
            .await
            .unwrap();

        let outcome = f.collector.run_cycle().await.unwrap();
        assert!(outcome.range_enqueued);

        let batch = f.queue.dequeue().unwrap();
        let positions: Vec<_> = batch.iter().map(|r| r.range_position()).collect();
        assert_eq!(positions, vec![None, Some(10), Some(11), Some(12)]);

        let cursor = f.storage.load_cursor("W1").await.unwrap().unwrap();
        assert_eq!(cursor.status(), Some(CursorStatus::InWriterQueue));

        // Waiting on the writer: the next cycle must not hand out the range again.
        let next = f.collector.run_cycle().await.unwrap();
        assert!(!next.range_enqueued);
        assert!(f.queue.is_empty());
    }

    struct MissingFuvConverter;

    #[async_trait]
    impl crate::convert::Converter for MissingFuvConverter {
        async fn convert(&self, id: i64, _relational_id: Uuid) -> Result<CanonicalRecord, ConvertError> {
            Err(ConvertError::MissingReference {
                tag: SourceTag::FuvLog,
                id,
            })
        }
    }

    #[tokio::test]
    async fn test_range_failure_does_not_block_broker_rows() {
        let mut f = fixture(true).await;
        for id in 1..=3 {
            f.storage
                .insert_fuv_log(&FuvLogRow {
                    id,
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        let row = f
            .storage
            .insert_broker_row(Some(r#"{"Source":1,"Data":[{"Id":2}]}"#))
            .await
            .unwrap();
        f.collector
            .converters
            .register(SourceTag::FuvLog, Arc::new(MissingFuvConverter));

        let outcome = f.collector.run_cycle().await.unwrap();
        assert_eq!(outcome.succeeded, vec![row]);
        assert!(!outcome.range_enqueued);
        assert_eq!(f.queue.dequeue().map(|b| b.len()), Some(1));

        let cursor = f.storage.load_cursor("W1").await.unwrap().unwrap();
        assert_eq!(cursor.status(), Some(CursorStatus::UnderProcess));
        assert_eq!((cursor.range_from, cursor.range_to), (1, 3));
    }

    #[tokio::test]
    async fn test_reset_stuck_recovers_rows_and_cursor() {
        let f = fixture(true).await;
        f.storage
            .insert_fuv_log(&FuvLogRow {
                id: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        let row = f
            .storage
            .insert_broker_row(Some(r#"{"Source":1,"Data":[{"Id":1}]}"#))
            .await
            .unwrap();

        f.collector.run_cycle().await.unwrap();
        assert_eq!(status(&f.storage, row).await, Some(BrokerStatus::Processed));

        f.collector.reset_stuck().await.unwrap();
        assert_eq!(status(&f.storage, row).await, Some(BrokerStatus::Available));
        let cursor = f.storage.load_cursor("W1").await.unwrap().unwrap();
        assert_eq!(cursor.status(), Some(CursorStatus::UnderProcess));
    }
}
