//! Reconnect policy for the streaming feed

use std::time::Duration;

/// Exponential backoff with a cap and a bounded number of attempts.
///
/// Attempt `n` (starting at 1) waits `min(base * 2^(n-1), cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << shift;
        self.base
            .checked_mul(factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

/// Consecutive-failure counter driven by the feed task
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Register a dropped or failed connection.
    ///
    /// Returns the attempt number and delay for the next try, or `None` once
    /// the budget is spent.
    pub fn on_failure(&mut self) -> Option<(u32, Duration)> {
        let attempt = self.attempts.saturating_add(1);
        if attempt > self.policy.max_attempts {
            return None;
        }
        self.attempts = attempt;
        Some((attempt, self.policy.delay_for(attempt)))
    }

    /// Any received message proves the connection healthy again
    pub fn on_message(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn test_first_five_delays_double() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        let delays: Vec<Duration> = (0..5).map(|_| state.on_failure().unwrap().1).collect();
        assert_eq!(delays, secs(&[1, 2, 4, 8, 16]));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
        assert_eq!(policy.delay_for(200), Duration::from_secs(30));
    }

    #[test]
    fn test_success_resets_counter() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        state.on_failure();
        state.on_failure();
        assert_eq!(state.on_failure(), Some((3, Duration::from_secs(4))));

        state.on_message();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.on_failure(), Some((1, Duration::from_secs(1))));
    }

    #[test]
    fn test_budget_exhausts_after_max_attempts() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        for expected in 1..=10 {
            assert_eq!(state.on_failure().map(|(n, _)| n), Some(expected));
        }
        assert_eq!(state.on_failure(), None);
        assert_eq!(state.attempts(), 10);
    }
}
