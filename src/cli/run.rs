use crate::alert::{spawn_timers, AlertEvaluator, AlertScheduler, Notifier, NotifierSettings, NotifyError};
use crate::checkout::{BrokerCheckout, RangeCheckout};
use crate::cleaner::{CleanerSettings, RetentionCleaner};
use crate::collector::LogCollector;
use crate::config::{load_config, Config, ConfigError};
use crate::convert::ConverterRegistry;
use crate::pipeline::create_queue;
use crate::remover::DataRemover;
use crate::storage::{DuckDbStorage, RangeStore, StorageError};
use crate::worker::{run_worker, Backoff, Worker};
use crate::writer::EntityWriter;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("notifier error: {0}")]
    Notifier(#[from] NotifyError),

    #[error("no worker_id configured and the host name is unavailable")]
    MissingWorkerId,
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logship/config.yml");
            eprintln!("  /etc/logship/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'logship config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_pipeline(&config_path).await.map_err(|e| e.into())
}

/// Opens each distinct database file once; stores sharing a path share a connection.
#[derive(Default)]
struct StoreCache {
    open: HashMap<PathBuf, Arc<DuckDbStorage>>,
}

impl StoreCache {
    fn open(&mut self, path: &Path) -> Result<Arc<DuckDbStorage>, StorageError> {
        if let Some(storage) = self.open.get(path) {
            return Ok(storage.clone());
        }
        info!(path = %path.display(), "Opening database");
        let storage = Arc::new(DuckDbStorage::new(path)?);
        self.open.insert(path.to_path_buf(), storage.clone());
        Ok(storage)
    }
}

async fn run_pipeline(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;
    let worker_id = config.worker_id.clone().ok_or(RunError::MissingWorkerId)?;
    info!(worker_id = %worker_id, transfer_mode = ?config.transfer_mode, "Starting logship");

    let mut stores = StoreCache::default();
    let install = stores.open(&config.storage.install_path)?;
    install.init_source_schema().await?;

    let target = stores.open(&config.storage.target_path)?;
    target.init_target_schema().await?;

    let fuv: Option<Arc<dyn RangeStore>> = match (&config.storage.fuv_path, config.range_source_enabled()) {
        (Some(path), true) => {
            let fuv = stores.open(path)?;
            fuv.init_range_schema().await?;
            Some(fuv as Arc<dyn RangeStore>)
        }
        _ => None,
    };
    if fuv.is_none() {
        info!("Range source disabled");
    }

    let (record_tx, record_rx) = create_queue();
    let (feedback_tx, feedback_rx) = create_queue();
    let range = fuv
        .clone()
        .map(|store| RangeCheckout::new(store, worker_id.clone()));

    let collector = LogCollector::new(
        BrokerCheckout::new(install.clone(), worker_id.clone()),
        range.clone(),
        ConverterRegistry::standard(install.clone(), fuv.clone()),
        record_tx,
        config.collector.max_rows_per_cycle,
    );
    let writer = EntityWriter::new(
        target.clone(),
        record_rx,
        feedback_tx,
        range,
        config.transfer_mode.deletes_original(),
    );
    let remover = DataRemover::new(install.clone(), fuv, feedback_rx, config.remover.max_batch);
    let cleaner = RetentionCleaner::new(target.clone(), cleaner_settings(&config));

    let notifier = Notifier::new(NotifierSettings {
        endpoint: config.notification.endpoint.clone(),
        install: config.notification.install.clone(),
        timeout: config.notification.timeout,
    })?;
    let evaluator = Arc::new(AlertEvaluator::new(target.clone(), notifier));

    let cancel = CancellationToken::new();
    let (timers, timer_task) = spawn_timers(evaluator, cancel.child_token());
    let scheduler = AlertScheduler::new(
        target,
        timers,
        config.alerter.poll_interval,
        config.alerter.run_timeout,
    );

    let backoff = Backoff::new(config.backoff.initial, config.backoff.max);
    let handles = vec![
        spawn(collector, config.collector.poll_delay, &backoff, &cancel),
        spawn(writer, config.writer.poll_delay, &backoff, &cancel),
        spawn(remover, config.remover.poll_delay, &backoff, &cancel),
        spawn(cleaner, config.cleaner.interval, &backoff, &cancel),
        spawn(scheduler, config.alerter.poll_interval, &backoff, &cancel),
    ];

    info!("Workers started, press Ctrl+C to shutdown");

    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task join error");
        }
    }
    if let Err(e) = timer_task.await {
        error!(error = %e, "Alert timer task join error");
    }

    info!("Shutdown complete");
    Ok(())
}

fn spawn<W: Worker + 'static>(
    worker: W,
    delay: Duration,
    backoff: &Backoff,
    cancel: &CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_worker(worker, delay, backoff.clone(), cancel.child_token()))
}

fn cleaner_settings(config: &Config) -> CleanerSettings {
    CleanerSettings {
        retention_days: config.cleaner.retention_days,
        batch_size: config.cleaner.batch_size,
        max_iterations: config.cleaner.max_iterations,
        orphan_batch: config.cleaner.orphan_batch,
        iteration_pause: config.cleaner.iteration_pause,
    }
}
