//! Bounded exponential backoff for retryable storage errors.

use std::time::Duration;

use tracing::debug;

const BACKOFF_BASE_MS: u64 = 2;
const BACKOFF_CAP_MS: u64 = 1_000;

/// Tracks how much of a millisecond budget has been slept away.
///
/// Sleeps double from `BACKOFF_BASE_MS` up to `BACKOFF_CAP_MS` and never
/// exceed what is left of the budget.
#[derive(Debug, Clone)]
pub struct Backoffer {
    budget: Duration,
    spent: Duration,
    attempt: u32,
}

impl Backoffer {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            spent: Duration::ZERO,
            attempt: 0,
        }
    }

    pub fn budget_ms(&self) -> u64 {
        u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.spent)
    }

    /// Next sleep, or `None` once the budget is used up.
    fn next_delay(&self) -> Option<Duration> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return None;
        }
        let exp = 1u64 << self.attempt.min(10);
        let delay = Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(exp).min(BACKOFF_CAP_MS));
        Some(delay.min(remaining))
    }

    /// Sleeps before the next retry. Returns `false` without sleeping when
    /// the budget is exhausted.
    pub async fn wait(&mut self, reason: &str) -> bool {
        let Some(delay) = self.next_delay() else {
            return false;
        };
        self.attempt = self.attempt.saturating_add(1);
        self.spent += delay;
        debug!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            remaining_ms = self.remaining().as_millis() as u64,
            reason,
            "backing off before retry"
        );
        tokio::time::sleep(delay).await;
        true
    }
}
