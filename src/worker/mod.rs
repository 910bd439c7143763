//! The poll loop shared by every background process.

mod backoff;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::alert::AlertError;
use crate::cleaner::CleanerError;
use crate::collector::CollectorError;
use crate::remover::RemoverError;
use crate::writer::WriterError;

pub use backoff::Backoff;

/// Error escaping one unit of work. The harness logs it and backs off.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Collector(#[from] CollectorError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error(transparent)]
    Remover(#[from] RemoverError),

    #[error(transparent)]
    Cleaner(#[from] CleanerError),

    #[error(transparent)]
    Alert(#[from] AlertError),
}

/// One background process driven by [`run_worker`].
#[async_trait]
pub trait Worker: Send {
    fn name(&self) -> &'static str;

    /// Runs once before the first cycle. Failures are logged and the loop starts anyway.
    async fn startup(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn run_once(&mut self) -> Result<(), WorkerError>;
}

/// Sleep, run one unit of work, repeat until `cancel` fires.
///
/// Cancellation is observed before each unit and during the sleep; a unit that
/// has started always runs to completion. After a failure the next sleep is the
/// backoff delay instead of `delay`.
pub async fn run_worker<W: Worker>(
    mut worker: W,
    delay: Duration,
    mut backoff: Backoff,
    cancel: CancellationToken,
) {
    let name = worker.name();
    tracing::info!(worker = name, delay_ms = delay.as_millis() as u64, "Worker started");

    if let Err(e) = worker.startup().await {
        tracing::error!(worker = name, error = %e, "Worker startup failed");
    }

    let mut wait = delay;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        if cancel.is_cancelled() {
            break;
        }

        match worker.run_once().await {
            Ok(()) => {
                backoff.record_success();
                wait = delay;
            }
            Err(e) => {
                wait = backoff.record_failure();
                tracing::error!(
                    worker = name,
                    errors = backoff.errors(),
                    "{}{}",
                    backoff.prefix(wait),
                    e
                );
            }
        }
    }

    tracing::info!(worker = name, "Worker stopped");
}
