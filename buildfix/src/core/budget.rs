//! Cycle and time budget helpers for deterministic orchestration.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// Monotonically decreasing count of command cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleBudget {
    limit: u32,
    remaining: u32,
}

impl CycleBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn used(&self) -> u32 {
        self.limit - self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Consume one cycle and return its 1-based number.
    pub fn charge(&mut self) -> Result<u32> {
        if self.remaining == 0 {
            return Err(anyhow!("cycle budget of {} exhausted", self.limit));
        }
        self.remaining -= 1;
        Ok(self.used())
    }
}

/// Time left until `deadline`, or `None` once it has passed.
pub fn remaining_until(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|remaining| !remaining.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_counts_down_and_stops_at_zero() {
        let mut budget = CycleBudget::new(2);
        assert_eq!(budget.charge().expect("first"), 1);
        assert_eq!(budget.charge().expect("second"), 2);
        assert!(budget.is_exhausted());
        assert!(budget.charge().is_err());
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn zero_budget_is_exhausted_immediately() {
        assert!(CycleBudget::new(0).is_exhausted());
    }

    #[test]
    fn past_deadline_has_no_time_left() {
        let past = Instant::now() - Duration::from_millis(5);
        assert!(remaining_until(past).is_none());
        let future = Instant::now() + Duration::from_secs(60);
        assert!(remaining_until(future).is_some());
    }
}
