//! Turns claimed broker rows and FUV ranges into batches for the writer.

mod payload;
mod runner;

pub use payload::{BrokerPayload, PayloadItem};
pub use runner::{CollectorError, CycleOutcome, LogCollector};
