use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::notify::{Mail, Notifier};
use super::AlertError;
use crate::storage::{AlertEvent, AlertRule, TargetStore};

/// What a fired alert timer runs.
#[async_trait]
pub trait RuleEvaluator: Send + Sync {
    async fn fire(&self, rule_id: Uuid);
}

/// Counts matching logs for a rule, records the event and mails recipients.
pub struct AlertEvaluator {
    target: Arc<dyn TargetStore>,
    notifier: Notifier,
}

impl AlertEvaluator {
    pub fn new(target: Arc<dyn TargetStore>, notifier: Notifier) -> Self {
        Self { target, notifier }
    }

    pub async fn evaluate(
        &self,
        rule_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertEvent>, AlertError> {
        let Some(rule) = self.target.get_alert_rule(rule_id).await? else {
            warn!(rule = %rule_id, "Alert rule disappeared before its timer fired");
            return Ok(None);
        };

        let since = chrono::Duration::try_minutes(rule.lookback_minutes)
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or(AlertError::Lookback {
                minutes: rule.lookback_minutes,
            })?;
        let match_count = self.target.count_logs_since(rule.min_log_level, since).await?;
        let event = AlertEvent {
            rule_id,
            created_on: now,
            match_count,
        };
        self.target.record_alert_event(&event).await?;
        debug!(rule = %rule.name, match_count, "Alert rule evaluated");

        if let Some(mail) = mail_for(&rule, match_count) {
            if let Err(e) = self.notifier.send(&mail).await {
                error!(rule = %rule.name, error = %e, "Error sending alert mail");
            }
        }

        Ok(Some(event))
    }
}

fn mail_for(rule: &AlertRule, match_count: i64) -> Option<Mail> {
    let to = rule.recipients.as_deref()?.trim();
    if match_count == 0 || to.is_empty() {
        return None;
    }

    Some(Mail {
        to: to.to_string(),
        subject: format!("Alert: {}", rule.name),
        body: format!(
            "{} log entries at level {} or above in the last {} minutes.",
            match_count, rule.min_log_level, rule.lookback_minutes
        ),
    })
}

#[async_trait]
impl RuleEvaluator for AlertEvaluator {
    async fn fire(&self, rule_id: Uuid) {
        match self.evaluate(rule_id, Utc::now()).await {
            Ok(Some(event)) => {
                info!(rule = %rule_id, match_count = event.match_count, "Alert fired")
            }
            Ok(None) => {}
            Err(e) => error!(rule = %rule_id, error = %e, "Alert evaluation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::NotifierSettings;
    use crate::storage::{DuckDbStorage, TargetLogRow};
    use chrono::TimeZone;
    use std::time::Duration;

    fn rule(recipients: Option<&str>) -> AlertRule {
        AlertRule {
            id: Uuid::new_v4(),
            name: "errors".to_string(),
            frequency: "*/5 * * * *".to_string(),
            last_run: None,
            is_active: true,
            min_log_level: 4,
            lookback_minutes: 30,
            recipients: recipients.map(str::to_string),
        }
    }

    fn log(level: i64, created_on: DateTime<Utc>) -> TargetLogRow {
        TargetLogRow {
            host_id: 1,
            master_data_id: 1,
            unique_id: Uuid::new_v4(),
            correlation_id: None,
            external_id: None,
            log_date: created_on,
            created_on,
            session: None,
            log_level: level,
            log_type: None,
            message: None,
            input_values: None,
            output_values: None,
            additional_data: None,
            user_data: None,
            is_audit: false,
        }
    }

    async fn evaluator() -> (AlertEvaluator, Arc<DuckDbStorage>) {
        let storage = DuckDbStorage::in_memory().unwrap();
        storage.init_target_schema().await.unwrap();
        let storage = Arc::new(storage);
        let notifier = Notifier::new(NotifierSettings {
            timeout: Duration::from_secs(1),
            ..Default::default()
        })
        .unwrap();
        (AlertEvaluator::new(storage.clone(), notifier), storage)
    }

    #[tokio::test]
    async fn test_counts_logs_in_lookback_window() {
        let (evaluator, storage) = evaluator().await;
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
        let rule = rule(Some("ops@example.com"));
        storage.save_alert_rule(&rule).await.unwrap();
        storage
            .insert_logs(&[
                log(4, now - chrono::Duration::minutes(5)),
                log(5, now - chrono::Duration::minutes(10)),
                log(2, now - chrono::Duration::minutes(5)),
                log(5, now - chrono::Duration::hours(2)),
            ])
            .await
            .unwrap();

        let event = evaluator.evaluate(rule.id, now).await.unwrap().unwrap();
        assert_eq!(event.match_count, 2);
        assert_eq!(storage.count_alert_events(rule.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unrepresentable_lookback_is_an_error() {
        let (evaluator, storage) = evaluator().await;
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();

        for minutes in [i64::MAX, 1_000_000_000_000] {
            let rule = AlertRule {
                lookback_minutes: minutes,
                ..rule(None)
            };
            storage.save_alert_rule(&rule).await.unwrap();

            let result = evaluator.evaluate(rule.id, now).await;
            assert!(matches!(result, Err(AlertError::Lookback { minutes: m }) if m == minutes));
            assert_eq!(storage.count_alert_events(rule.id).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_missing_rule_is_skipped() {
        let (evaluator, _) = evaluator().await;
        assert!(evaluator.evaluate(Uuid::new_v4(), Utc::now()).await.unwrap().is_none());
    }

    #[test]
    fn test_mail_only_for_matches_with_recipients() {
        assert!(mail_for(&rule(None), 3).is_none());
        assert!(mail_for(&rule(Some("  ")), 3).is_none());
        assert!(mail_for(&rule(Some("ops@example.com")), 0).is_none());

        let mail = mail_for(&rule(Some("ops@example.com")), 3).unwrap();
        assert_eq!(mail.to, "ops@example.com");
        assert!(mail.subject.contains("errors"));
    }
}
