//! Reconnect delay policy.

use std::time::Duration;

/// Exponential backoff with a ceiling: `delay(n) = min(base * 2^n, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            cap: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before the reconnect that follows `consecutive_failures` failures.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        2u32.checked_pow(consecutive_failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (0..6).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![3, 6, 12, 24, 30, 30]);
    }

    #[test]
    fn monotonic_and_capped_for_all_counts() {
        let policy = BackoffPolicy::new(Duration::from_millis(250), Duration::from_secs(20));
        let mut previous = Duration::ZERO;
        for n in 0..=u32::from(u8::MAX) {
            let delay = policy.delay(n);
            assert!(delay >= previous, "delay({n}) went down");
            assert!(delay <= policy.cap, "delay({n}) exceeded cap");
            let expected = 2u128
                .checked_pow(n)
                .map(|f| policy.base.as_millis().saturating_mul(f))
                .unwrap_or(u128::MAX)
                .min(policy.cap.as_millis());
            assert_eq!(delay.as_millis(), expected);
            previous = delay;
        }
    }

    #[test]
    fn huge_counts_saturate_at_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(u32::MAX), policy.cap);
        assert_eq!(policy.delay(40), policy.cap);
    }
}
