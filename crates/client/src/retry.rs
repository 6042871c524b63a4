//! Reconnect budget with linear backoff.

use std::time::Duration;

use hotpatch_protocol::constants::{RETRY_BASE_DELAY, RETRY_BUDGET};

/// Reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after a failure before giving up.
    pub budget: u32,
    /// Delay step; the n-th retry waits `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            budget: RETRY_BUDGET,
            base_delay: RETRY_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// What to do after a failed or dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted,
}

/// Remaining retries for one connection.
///
/// Refilled on every successful connect.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: RetryPolicy,
    remaining: u32,
}

impl RetryBudget {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            remaining: policy.budget,
        }
    }

    /// Consumes one retry, or reports that none are left.
    pub fn on_failure(&mut self) -> RetryDecision {
        if self.remaining == 0 {
            return RetryDecision::Exhausted;
        }
        self.remaining -= 1;
        let attempt = self.policy.budget - self.remaining;
        RetryDecision::Retry {
            attempt,
            delay: self.policy.delay_for_attempt(attempt),
        }
    }

    /// Restores the full budget.
    pub fn reset(&mut self) {
        self.remaining = self.policy.budget;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(budget: &mut RetryBudget) -> (Vec<u64>, RetryDecision) {
        let mut out = Vec::new();
        loop {
            match budget.on_failure() {
                RetryDecision::Retry { delay, .. } => out.push(delay.as_millis() as u64),
                exhausted => return (out, exhausted),
            }
        }
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.budget, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn linear_delays_then_exhausted() {
        let mut budget = RetryBudget::new(RetryPolicy::default());
        let (delays, last) = delays(&mut budget);
        assert_eq!(delays, vec![500, 1000, 1500, 2000, 2500]);
        assert_eq!(last, RetryDecision::Exhausted);
        // Stays exhausted.
        assert_eq!(budget.on_failure(), RetryDecision::Exhausted);
    }

    #[test]
    fn reset_restores_full_budget() {
        let mut budget = RetryBudget::new(RetryPolicy::default());
        budget.on_failure();
        budget.on_failure();
        assert_eq!(budget.remaining(), 3);

        budget.reset();
        assert_eq!(budget.remaining(), 5);
        assert_eq!(
            budget.on_failure(),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(500)
            }
        );
    }

    #[test]
    fn zero_budget_is_immediately_exhausted() {
        let mut budget = RetryBudget::new(RetryPolicy {
            budget: 0,
            base_delay: Duration::from_millis(10),
        });
        assert_eq!(budget.on_failure(), RetryDecision::Exhausted);
    }
}
