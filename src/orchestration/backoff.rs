//! Truncated exponential backoff with jitter.

use std::time::Duration;

/// Backoff policy: `delay(n) = min(cap, base * 2^(n-1))` with a uniform
/// jitter of ±`jitter_pct`. Attempt numbers start at 1.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    jitter_pct: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, jitter_pct: f64) -> Self {
        Self {
            base,
            cap,
            jitter_pct: jitter_pct.clamp(0.0, 0.99),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay before the given attempt (1-based), jittered
    pub fn delay(&self, attempt: u32) -> Duration {
        let jittered = self.raw_delay(attempt).mul_f64(self.jitter_factor());
        jittered.min(self.cap)
    }

    /// Delay without jitter, truncated at the cap
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let multiplier = 2u64.saturating_pow(exponent);
        let delay = self
            .base
            .checked_mul(multiplier.min(u32::MAX as u64) as u32)
            .unwrap_or(self.cap);
        delay.min(self.cap)
    }

    fn jitter_factor(&self) -> f64 {
        if self.jitter_pct <= 0.0 {
            return 1.0;
        }
        // uniform in [1 - jitter, 1 + jitter]
        1.0 + self.jitter_pct * (fastrand::f64() * 2.0 - 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter(base_s: u64, cap_s: u64) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(base_s),
            Duration::from_secs(cap_s),
            0.0,
        )
    }

    #[test]
    fn test_exponential_progression() {
        let policy = policy_without_jitter(1, 60);
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
    }

    #[test]
    fn test_cap_truncation() {
        let policy = policy_without_jitter(5, 300);
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(7), Duration::from_secs(300));
        assert_eq!(policy.delay(60), Duration::from_secs(300));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy::new(
            Duration::from_secs(4),
            Duration::from_secs(600),
            0.2,
        );
        for attempt in 1..=6 {
            let raw = policy.raw_delay(attempt);
            for _ in 0..100 {
                let jittered = policy.delay(attempt);
                assert!(jittered >= raw.mul_f64(0.8));
                assert!(jittered <= raw.mul_f64(1.2));
            }
        }
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let policy = BackoffPolicy::new(
            Duration::from_secs(100),
            Duration::from_secs(100),
            0.2,
        );
        for _ in 0..100 {
            assert!(policy.delay(5) <= Duration::from_secs(100));
        }
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = policy_without_jitter(1, 60);
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(60));
    }
}
