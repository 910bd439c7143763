use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::evaluator::RuleEvaluator;

/// Pending one-shot alert timers, earliest deadline on top.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, Uuid)>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, at: DateTime<Utc>, rule_id: Uuid) {
        self.heap.push(Reverse((at, rule_id)));
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Remove and return every rule whose deadline is at or before `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut due = Vec::new();
        while let Some(Reverse((at, _))) = self.heap.peek() {
            if *at > now {
                break;
            }
            if let Some(Reverse((_, rule_id))) = self.heap.pop() {
                due.push(rule_id);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Sender side of the timer task.
#[derive(Clone)]
pub struct TimerHandle {
    tx: mpsc::UnboundedSender<(DateTime<Utc>, Uuid)>,
}

impl TimerHandle {
    /// Returns false once the timer task has stopped.
    pub fn arm(&self, at: DateTime<Utc>, rule_id: Uuid) -> bool {
        self.tx.send((at, rule_id)).is_ok()
    }
}

/// Spawn the task that owns the timer queue and fires rules through `evaluator`.
///
/// Each firing runs on its own task so a slow evaluation never delays the next deadline.
pub fn spawn_timers(
    evaluator: Arc<dyn RuleEvaluator>,
    cancel: CancellationToken,
) -> (TimerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_timers(rx, evaluator, cancel));
    (TimerHandle { tx }, task)
}

async fn run_timers(
    mut rx: mpsc::UnboundedReceiver<(DateTime<Utc>, Uuid)>,
    evaluator: Arc<dyn RuleEvaluator>,
    cancel: CancellationToken,
) {
    let mut queue = TimerQueue::new();
    let mut senders_open = true;

    loop {
        let deadline = queue.next_deadline();
        let wait = deadline
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv(), if senders_open => match msg {
                Some((at, rule_id)) => {
                    debug!(rule = %rule_id, at = %at, "Alert timer armed");
                    queue.arm(at, rule_id);
                }
                None => senders_open = false,
            },
            _ = tokio::time::sleep(wait), if deadline.is_some() => {
                for rule_id in queue.pop_due(Utc::now()) {
                    let evaluator = evaluator.clone();
                    tokio::spawn(async move { evaluator.fire(rule_id).await });
                }
            }
        }

        if !senders_open && queue.is_empty() {
            break;
        }
    }

    if !queue.is_empty() {
        warn!(pending = queue.len(), "Alert timers dropped on shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;

    #[test]
    fn test_pop_due_in_deadline_order() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut queue = TimerQueue::new();
        queue.arm(base + chrono::Duration::seconds(30), c);
        queue.arm(base + chrono::Duration::seconds(10), a);
        queue.arm(base + chrono::Duration::seconds(20), b);

        assert_eq!(queue.next_deadline(), Some(base + chrono::Duration::seconds(10)));
        assert_eq!(queue.pop_due(base + chrono::Duration::seconds(20)), vec![a, b]);
        assert_eq!(queue.len(), 1);
        assert!(queue.pop_due(base).is_empty());
    }

    struct Recorder(mpsc::UnboundedSender<Uuid>);

    #[async_trait]
    impl RuleEvaluator for Recorder {
        async fn fire(&self, rule_id: Uuid) {
            let _ = self.0.send(rule_id);
        }
    }

    #[tokio::test]
    async fn test_armed_rules_fire_once_in_order() {
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (handle, task) = spawn_timers(Arc::new(Recorder(fired_tx)), cancel.clone());

        let (early, late) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        assert!(handle.arm(now + chrono::Duration::milliseconds(80), late));
        assert!(handle.arm(now + chrono::Duration::milliseconds(20), early));

        let first = tokio::time::timeout(Duration::from_secs(2), fired_rx.recv()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), fired_rx.recv()).await.unwrap();
        assert_eq!(first, Some(early));
        assert_eq!(second, Some(late));

        cancel.cancel();
        task.await.unwrap();
        assert!(fired_rx.try_recv().is_err());
        assert!(!handle.arm(now, early));
    }
}
