//! Cron-driven alert rules: the polling scheduler, its timer task, rule
//! evaluation and outbound notification.

mod evaluator;
mod notify;
mod scheduler;
mod timers;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use thiserror::Error;

use crate::storage::StorageError;

pub use evaluator::{AlertEvaluator, RuleEvaluator};
pub use notify::{Mail, Notifier, NotifierSettings, NotifyError};
pub use scheduler::AlertScheduler;
pub use timers::{spawn_timers, TimerHandle, TimerQueue};

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid cron expression '{expr}': {message}")]
    Cron { expr: String, message: String },

    #[error("lookback of {minutes} minutes is out of range")]
    Lookback { minutes: i64 },
}

/// Parse a rule frequency. Five-field expressions get a leading seconds field.
pub fn parse_schedule(expr: &str) -> Result<Schedule, AlertError> {
    let trimmed = expr.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| AlertError::Cron {
        expr: expr.to_string(),
        message: e.to_string(),
    })
}

/// Occurrences of `schedule` in the closed window `[from, to]`, earliest first.
pub fn occurrences_between(
    schedule: &Schedule,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    // `after` is exclusive; step back so an occurrence exactly at `from` counts.
    let start = from - chrono::Duration::seconds(1);
    schedule
        .after(&start)
        .take_while(|at| *at <= to)
        .filter(|at| *at >= from)
        .collect()
}
