//! Reconnect delay policy.

use std::time::Duration;

/// Exponential backoff with a floor and a cap.
///
/// Attempt numbers are 1-based: attempt 1 waits the floor, each further
/// attempt doubles, and the delay never exceeds the cap. The policy is pure;
/// the session driver owns the attempt counter and resets it once a
/// connection reaches the connected state.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    floor: Duration,
    cap: Duration,
}

impl ReconnectPolicy {
    pub fn new(floor: Duration, cap: Duration) -> Self {
        Self {
            floor,
            cap: cap.max(floor),
        }
    }

    pub fn from_millis(floor_ms: u64, cap_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(floor_ms),
            Duration::from_millis(cap_ms),
        )
    }

    /// Delay before the given reconnect attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let millis = (self.floor.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(millis).min(self.cap)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_millis(2_000, 60_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_waits_the_floor() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(2));
    }

    #[test]
    fn delays_double_and_never_shrink() {
        let policy = ReconnectPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = policy.delay(attempt);
            assert!(delay >= previous, "attempt {attempt} shrank");
            previous = delay;
        }
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
    }

    #[test]
    fn cap_holds_even_for_huge_attempt_counts() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(6), Duration::from_secs(60));
        assert_eq!(policy.delay(40), Duration::from_secs(60));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn attempt_zero_is_treated_as_one() {
        let policy = ReconnectPolicy::from_millis(100, 500);
        assert_eq!(policy.delay(0), Duration::from_millis(100));
    }

    #[test]
    fn cap_below_floor_is_lifted_to_the_floor() {
        let policy = ReconnectPolicy::from_millis(1_000, 10);
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(5), Duration::from_secs(1));
    }
}
