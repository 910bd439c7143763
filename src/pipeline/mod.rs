//! In-memory hand-off between the collector, writer and remover loops.
//!
//! The queues are volatile. The collector marks broker rows Processed as soon
//! as their records are queued, but the rows are only deleted once the remover
//! sees the writer's feedback, and the startup reset returns both UnderProcess
//! and Processed rows of the owner to the pool. A range cursor stays at
//! InWriterQueue until its high-water record is written and is reset to
//! UnderProcess on startup. A restart therefore re-claims whatever was lost here.

pub mod queue;

use crate::record::{CanonicalRecord, FeedbackInstruction};

pub use queue::{create_queue, QueueReceiver, QueueSender};

/// Collector to writer: one batch per collection cycle.
pub type RecordSender = QueueSender<Vec<CanonicalRecord>>;
pub type RecordReceiver = QueueReceiver<Vec<CanonicalRecord>>;

/// Writer to remover: one instruction per written record.
pub type FeedbackSender = QueueSender<FeedbackInstruction>;
pub type FeedbackReceiver = QueueReceiver<FeedbackInstruction>;
