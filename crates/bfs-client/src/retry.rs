//! Exponential back-off between write rounds.

use std::time::{Duration, Instant};

/// Doubles the wait after every call to [`next_wait`](Self::next_wait),
/// capped at `max_wait`, and stops once `total_budget` has elapsed.
#[derive(Debug)]
pub struct ExponentialBackoff {
    max_wait: Duration,
    total_budget: Duration,
    current_wait: Duration,
    start: Instant,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(init_wait: Duration, max_wait: Duration, total_budget: Duration) -> Self {
        Self {
            max_wait,
            total_budget,
            current_wait: init_wait,
            start: Instant::now(),
            attempts: 0,
        }
    }

    /// Next wait, clamped to the remaining budget; `None` once exhausted.
    pub fn next_wait(&mut self) -> Option<Duration> {
        let elapsed = self.start.elapsed();
        if elapsed >= self.total_budget {
            return None;
        }
        let wait = self.current_wait;
        self.current_wait = (self.current_wait * 2).min(self.max_wait);
        self.attempts += 1;
        Some(wait.min(self.total_budget - elapsed))
    }

    /// Sleep for the next wait. Returns `false` if the budget is spent.
    pub async fn wait(&mut self) -> bool {
        match self.next_wait() {
            Some(d) => {
                tokio::time::sleep(d).await;
                true
            }
            None => false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
