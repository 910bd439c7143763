use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity used for every claim and reset. Defaults to the host name.
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub transfer_mode: TransferMode,
    pub storage: StorageConfig,
    #[serde(default)]
    pub range_source: RangeSourceConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub remover: RemoverConfig,
    #[serde(default)]
    pub cleaner: CleanerConfig,
    #[serde(default)]
    pub alerter: AlerterConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

impl Config {
    /// True when the range-claimed FUV source should be read.
    pub fn range_source_enabled(&self) -> bool {
        self.range_source.enabled && self.storage.fuv_path.is_some()
    }
}

/// Whether upstream rows are deleted after they have been written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Move,
    Copy,
}

impl TransferMode {
    pub fn deletes_original(self) -> bool {
        matches!(self, TransferMode::Move)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Broker table and the install-side upstream tables.
    pub install_path: PathBuf,
    /// FUV log table and range cursors.
    #[serde(default)]
    pub fuv_path: Option<PathBuf>,
    /// Normalized log store.
    pub target_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeSourceConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_max_rows_per_cycle")]
    pub max_rows_per_cycle: usize,
    #[serde(default = "default_collector_delay", with = "humantime_serde")]
    pub poll_delay: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_rows_per_cycle: default_max_rows_per_cycle(),
            poll_delay: default_collector_delay(),
        }
    }
}

fn default_max_rows_per_cycle() -> usize {
    100
}

fn default_collector_delay() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "default_writer_delay", with = "humantime_serde")]
    pub poll_delay: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            poll_delay: default_writer_delay(),
        }
    }
}

fn default_writer_delay() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoverConfig {
    #[serde(default = "default_remover_delay", with = "humantime_serde")]
    pub poll_delay: Duration,
    #[serde(default = "default_remover_batch")]
    pub max_batch: usize,
}

impl Default for RemoverConfig {
    fn default() -> Self {
        Self {
            poll_delay: default_remover_delay(),
            max_batch: default_remover_batch(),
        }
    }
}

fn default_remover_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_remover_batch() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanerConfig {
    #[serde(default = "default_cleaner_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_cleaner_batch")]
    pub batch_size: usize,
    #[serde(default = "default_cleaner_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_orphan_batch")]
    pub orphan_batch: usize,
    #[serde(default = "default_iteration_pause", with = "humantime_serde")]
    pub iteration_pause: Duration,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            interval: default_cleaner_interval(),
            retention_days: default_retention_days(),
            batch_size: default_cleaner_batch(),
            max_iterations: default_cleaner_iterations(),
            orphan_batch: default_orphan_batch(),
            iteration_pause: default_iteration_pause(),
        }
    }
}

fn default_cleaner_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_retention_days() -> u32 {
    30
}

fn default_cleaner_batch() -> usize {
    20_000
}

fn default_cleaner_iterations() -> usize {
    60
}

fn default_orphan_batch() -> usize {
    50_000
}

fn default_iteration_pause() -> Duration {
    Duration::from_millis(5)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlerterConfig {
    #[serde(default = "default_alert_poll", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// A rule that ran within this window is not scheduled again.
    #[serde(default = "default_alert_timeout", with = "humantime_serde")]
    pub run_timeout: Duration,
}

impl Default for AlerterConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_alert_poll(),
            run_timeout: default_alert_timeout(),
        }
    }
}

fn default_alert_poll() -> Duration {
    Duration::from_secs(180)
}

fn default_alert_timeout() -> Duration {
    Duration::from_secs(600)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial", with = "humantime_serde")]
    pub initial: Duration,
    #[serde(default = "default_backoff_max", with = "humantime_serde")]
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: default_backoff_initial(),
            max: default_backoff_max(),
        }
    }
}

fn default_backoff_initial() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_max() -> Duration {
    Duration::from_secs(300)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Mail endpoint; alert mail is only logged when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub install: String,
    #[serde(default = "default_notify_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            install: String::new(),
            timeout: default_notify_timeout(),
        }
    }
}

fn default_notify_timeout() -> Duration {
    Duration::from_secs(30)
}
