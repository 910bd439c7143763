use std::time::Duration;

/// Consecutive-failure counter driving the harness retry delay.
///
/// The n-th consecutive failure waits `initial * 2^(n-1)`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    errors: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            errors: 0,
        }
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    /// Count a failure and return how long to wait before the next attempt.
    pub fn record_failure(&mut self) -> Duration {
        self.errors = self.errors.saturating_add(1);
        let factor = 1u32.checked_shl(self.errors - 1).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn record_success(&mut self) {
        self.errors = 0;
    }

    /// Diagnostic prefix for the failure log line, e.g. `[error #3, retry in 20s] `.
    pub fn prefix(&self, delay: Duration) -> String {
        format!("[error #{}, retry in {}s] ", self.errors, delay.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(60));

        let delays: Vec<_> = (0..6).map(|_| backoff.record_failure().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
        assert_eq!(backoff.errors(), 6);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        backoff.record_failure();
        backoff.record_failure();
        backoff.record_success();

        assert_eq!(backoff.errors(), 0);
        assert_eq!(backoff.record_failure(), Duration::from_secs(1));
    }

    #[test]
    fn test_many_failures_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(300));
        for _ in 0..100 {
            assert!(backoff.record_failure() <= Duration::from_secs(300));
        }
    }

    #[test]
    fn test_prefix() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(60));
        backoff.record_failure();
        let delay = backoff.record_failure();

        assert_eq!(backoff.prefix(delay), "[error #2, retry in 10s] ");
    }
}
