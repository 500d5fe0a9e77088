//! Reconnection backoff
//!
//! Pure functions only: `delay(attempt) = min(base * 2^attempt, max)`.
//! Callers own the attempt counter; it is bumped after each failed attempt
//! and reset to zero after a successful connect.

use std::time::Duration;

/// Exponential backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before retrying after `attempt` consecutive failures (0-based).
    ///
    /// Saturates instead of overflowing, so the result never exceeds `max_delay`
    /// however large `attempt` grows.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Sum of delays for the first `attempts` failures
    pub fn total_delay(&self, attempts: u32) -> Duration {
        (0..attempts).fold(Duration::ZERO, |total, attempt| {
            total.saturating_add(self.delay_for(attempt))
        })
    }
}

/// Per-link backoff position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffCursor {
    pub attempt: u32,
    pub policy: BackoffPolicy,
}

impl BackoffCursor {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { attempt: 0, policy }
    }

    pub fn base_delay(&self) -> Duration {
        self.policy.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.policy.max_delay
    }
}

/// Delay the cursor currently prescribes.
pub fn next_delay(cursor: &BackoffCursor) -> Duration {
    cursor.policy.delay_for(cursor.attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(base_ms: u64, max_ms: u64) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
    }

    proptest! {
        #[test]
        fn delay_matches_formula_and_never_exceeds_max(
            base_ms in 1u64..5_000,
            extra_ms in 0u64..600_000,
            attempt in 0u32..200,
        ) {
            let policy = policy(base_ms, base_ms + extra_ms);
            let delay = policy.delay_for(attempt);

            prop_assert!(delay <= policy.max_delay);

            let expected = if attempt >= 64 {
                policy.max_delay
            } else {
                let scaled = (base_ms as u128) << attempt;
                Duration::from_millis(scaled.min((base_ms + extra_ms) as u128) as u64)
            };
            prop_assert_eq!(delay, expected);
        }

        #[test]
        fn delay_is_monotonic(base_ms in 1u64..5_000, attempt in 0u32..100) {
            let policy = policy(base_ms, 120_000);
            prop_assert!(policy.delay_for(attempt) <= policy.delay_for(attempt + 1));
        }
    }

    #[test]
    fn test_default_policy_sequence() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (0..9).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 64, 120, 120]);
    }

    #[test]
    fn test_huge_attempts_saturate() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(31), Duration::from_secs(120));
        assert_eq!(policy.delay_for(32), Duration::from_secs(120));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(120));
    }

    #[test]
    fn test_next_delay_uses_cursor_attempt() {
        let mut cursor = BackoffCursor::new(policy(500, 10_000));
        assert_eq!(next_delay(&cursor), Duration::from_millis(500));

        cursor.attempt = 3;
        assert_eq!(next_delay(&cursor), Duration::from_millis(4_000));

        cursor.attempt = 10;
        assert_eq!(next_delay(&cursor), Duration::from_millis(10_000));
    }

    #[test]
    fn test_total_delay() {
        let policy = policy(100, 1_000);
        assert_eq!(policy.total_delay(0), Duration::ZERO);
        // 100 + 200 + 400 + 800 + 1000
        assert_eq!(policy.total_delay(5), Duration::from_millis(2_500));
    }
}
