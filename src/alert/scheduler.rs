use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::timers::TimerHandle;
use super::{occurrences_between, parse_schedule, AlertError};
use crate::storage::{AlertRule, TargetStore};
use crate::worker::{Worker, WorkerError};

/// Polls active rules and arms a timer for each rule due before the next poll.
pub struct AlertScheduler {
    target: Arc<dyn TargetStore>,
    timers: TimerHandle,
    poll_interval: Duration,
    run_timeout: Duration,
}

impl AlertScheduler {
    pub fn new(
        target: Arc<dyn TargetStore>,
        timers: TimerHandle,
        poll_interval: Duration,
        run_timeout: Duration,
    ) -> Self {
        Self {
            target,
            timers,
            poll_interval,
            run_timeout,
        }
    }

    fn eligible(&self, rule: &AlertRule, now: DateTime<Utc>) -> bool {
        match rule.last_run {
            None => true,
            Some(last_run) => match chrono::Duration::from_std(self.run_timeout) {
                Ok(timeout) => last_run + timeout <= now,
                Err(_) => false,
            },
        }
    }

    /// One poll. Returns the rules armed and their fire times.
    pub async fn schedule_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, DateTime<Utc>)>, AlertError> {
        let window_end = now
            + chrono::Duration::from_std(self.poll_interval)
                .unwrap_or_else(|_| chrono::Duration::minutes(3));

        let mut armed = Vec::new();
        for rule in self.target.active_alert_rules().await? {
            if !self.eligible(&rule, now) {
                continue;
            }

            let schedule = match parse_schedule(&rule.frequency) {
                Ok(schedule) => schedule,
                Err(e) => {
                    error!(rule = %rule.name, error = %e, "Skipping alert rule");
                    continue;
                }
            };

            let Some(&fire_at) = occurrences_between(&schedule, now, window_end).first() else {
                continue;
            };

            self.target.mark_alert_rule_run(rule.id, now).await?;
            if !self.timers.arm(fire_at, rule.id) {
                warn!(rule = %rule.name, "Alert timer task is not running");
                continue;
            }
            debug!(rule = %rule.name, fire_at = %fire_at, "Alert scheduled until {}", window_end);
            armed.push((rule.id, fire_at));
        }

        Ok(armed)
    }
}

#[async_trait]
impl Worker for AlertScheduler {
    fn name(&self) -> &'static str {
        "alerter"
    }

    async fn run_once(&mut self) -> Result<(), WorkerError> {
        self.schedule_at(Utc::now()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{spawn_timers, RuleEvaluator};
    use crate::storage::DuckDbStorage;
    use chrono::TimeZone;
    use tokio_util::sync::CancellationToken;

    struct Noop;

    #[async_trait]
    impl RuleEvaluator for Noop {
        async fn fire(&self, _rule_id: Uuid) {}
    }

    fn rule(frequency: &str, last_run: Option<DateTime<Utc>>) -> AlertRule {
        AlertRule {
            id: Uuid::new_v4(),
            name: frequency.to_string(),
            frequency: frequency.to_string(),
            last_run,
            is_active: true,
            min_log_level: 4,
            lookback_minutes: 60,
            recipients: None,
        }
    }

    async fn scheduler(rules: &[AlertRule]) -> (AlertScheduler, Arc<DuckDbStorage>, CancellationToken) {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_target_schema().await.unwrap();
        for rule in rules {
            storage.save_alert_rule(rule).await.unwrap();
        }
        let storage = Arc::new(storage);
        let cancel = CancellationToken::new();
        let (timers, _task) = spawn_timers(Arc::new(Noop), cancel.clone());
        let scheduler = AlertScheduler::new(
            storage.clone(),
            timers,
            Duration::from_secs(180),
            Duration::from_secs(600),
        );
        (scheduler, storage, cancel)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 10, 1, 0).unwrap()
    }

    #[tokio::test]
    async fn test_due_rule_is_armed_at_earliest_occurrence() {
        let due = rule("0 */2 * * * *", None);
        let (scheduler, storage, cancel) = scheduler(&[due.clone()]).await;

        let armed = scheduler.schedule_at(now()).await.unwrap();
        assert_eq!(
            armed,
            vec![(due.id, Utc.with_ymd_and_hms(2024, 3, 4, 10, 2, 0).unwrap())]
        );
        let stored = storage.get_alert_rule(due.id).await.unwrap().unwrap();
        assert_eq!(stored.last_run, Some(now()));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_rule_without_occurrence_keeps_last_run() {
        let last_run = now() - chrono::Duration::days(1);
        let nightly = rule("0 0 3 * * *", Some(last_run));
        let (scheduler, storage, cancel) = scheduler(&[nightly.clone()]).await;

        assert!(scheduler.schedule_at(now()).await.unwrap().is_empty());
        let stored = storage.get_alert_rule(nightly.id).await.unwrap().unwrap();
        assert_eq!(stored.last_run, Some(last_run));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_recent_run_blocks_rearming() {
        let recent = rule("0 * * * * *", Some(now() - chrono::Duration::minutes(2)));
        let stale = rule("0 * * * * *", Some(now() - chrono::Duration::minutes(20)));
        let (scheduler, _, cancel) = scheduler(&[recent, stale.clone()]).await;

        let armed = scheduler.schedule_at(now()).await.unwrap();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].0, stale.id);

        assert!(scheduler.schedule_at(now()).await.unwrap().is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_bad_cron_does_not_block_other_rules() {
        let broken = rule("every tuesday", None);
        let good = rule("*/1 * * * *", None);
        let (scheduler, _, cancel) = scheduler(&[broken, good.clone()]).await;

        let armed = scheduler.schedule_at(now()).await.unwrap();
        assert_eq!(armed.len(), 1);
        assert_eq!(armed[0].0, good.id);
        cancel.cancel();
    }
}
