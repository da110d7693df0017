use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status polling schedule for long-running engine tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollBackoffPolicy {
    /// First delay between status checks, in milliseconds.
    pub initial_interval_ms: u64,
    /// Growth factor applied after every check.
    pub multiplier: f64,
    /// Upper bound of a single delay, in milliseconds.
    pub max_interval_ms: u64,
    /// Status checks allowed before the wait is abandoned for this cycle.
    pub max_attempts: u32,
}

impl Default for PollBackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 250,
            multiplier: 2.0,
            max_interval_ms: 10_000,
            max_attempts: 64,
        }
    }
}

impl PollBackoffPolicy {
    pub fn fixed(interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            initial_interval_ms: interval_ms,
            multiplier: 1.0,
            max_interval_ms: interval_ms,
            max_attempts,
        }
    }

    pub fn start(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            policy: self.clone(),
            attempt: 0,
            current_ms: self.initial_interval_ms as f64,
        }
    }
}

/// Iterator-like delay source. `next` returns `None` once the attempt
/// budget is spent.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: PollBackoffPolicy,
    attempt: u32,
    current_ms: f64,
}

impl ExponentialBackoff {
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn next(&mut self) -> Option<Duration> {
        if self.attempt + 1 >= self.policy.max_attempts.max(1) {
            return None;
        }
        self.attempt += 1;

        let cap = self.policy.max_interval_ms.max(self.policy.initial_interval_ms) as f64;
        let delay = self.current_ms.min(cap);
        self.current_ms = (self.current_ms * self.policy.multiplier.max(1.0)).min(cap);
        Some(Duration::from_millis(delay.round() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_until_capped_then_stops() {
        let policy = PollBackoffPolicy {
            initial_interval_ms: 100,
            multiplier: 2.0,
            max_interval_ms: 300,
            max_attempts: 5,
        };
        let mut backoff = policy.start();
        let delays: Vec<u64> = std::iter::from_fn(|| backoff.next())
            .map(|d| d.as_millis() as u64)
            .collect();
        // Five status checks leave room for four sleeps between them.
        assert_eq!(delays, vec![100, 200, 300, 300]);
    }

    #[test]
    fn single_attempt_never_sleeps() {
        let mut backoff = PollBackoffPolicy::fixed(10, 1).start();
        assert_eq!(backoff.next(), None);
    }
}
