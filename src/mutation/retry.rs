use crate::core::{ArchiveError, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Bounded retry of writes that lost an optimistic concurrency race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictRetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base duration in milliseconds for backoff calculation.
    pub base_backoff_ms: u64,
    /// Maximum duration in milliseconds for backoff.
    pub max_backoff_ms: u64,
}

impl Default for ConflictRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff_ms: 5,
            max_backoff_ms: 100,
        }
    }
}

impl ConflictRetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn without_backoff(mut self) -> Self {
        self.base_backoff_ms = 0;
        self.max_backoff_ms = 0;
        self
    }

    /// Only version conflicts are retried, and only while retries remain.
    fn should_retry(&self, attempt: u32, err: &ArchiveError) -> bool {
        matches!(err, ArchiveError::VersionConflict { .. }) && attempt <= self.max_retries
    }

    /// Computes exponential retry backoff in milliseconds.
    fn retry_backoff_ms(&self, attempt: u32) -> u64 {
        let base = self.base_backoff_ms;
        let cap = self.max_backoff_ms.max(base);

        let mut backoff = base;
        for _ in 1..attempt {
            backoff = backoff.saturating_mul(2).min(cap);
        }
        backoff
    }

    /// Runs `write` until it succeeds, fails with something other than a
    /// version conflict, or runs out of retries.
    ///
    /// `NotFound` and `Conflict` are returned as they are. Exhausted retries
    /// and every other failure become `Runtime { operation, target_id }`.
    pub async fn run<F, Fut, T>(&self, operation: &str, target_id: &str, mut write: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        loop {
            match write().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if self.should_retry(attempt, &err) {
                        let backoff_ms = self.retry_backoff_ms(attempt);
                        warn!(
                            "{} retry on conflict for '{}' (attempt {} of {}, backoff={}ms)",
                            operation,
                            target_id,
                            attempt,
                            self.max_retries + 1,
                            backoff_ms
                        );
                        if backoff_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        }
                        attempt += 1;
                        continue;
                    }

                    if matches!(err, ArchiveError::VersionConflict { .. }) {
                        return Err(ArchiveError::Runtime {
                            operation: operation.to_string(),
                            target_id: target_id.to_string(),
                            message: format!(
                                "version conflict persisted after {} attempts",
                                attempt
                            ),
                        });
                    }
                    return Err(err.into_runtime(operation, target_id));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ConflictRetryPolicy {
            max_retries: 5,
            base_backoff_ms: 5,
            max_backoff_ms: 18,
        };
        let delays: Vec<u64> = (1..=4).map(|a| policy.retry_backoff_ms(a)).collect();
        assert_eq!(delays, vec![5, 10, 18, 18]);
    }

    #[test]
    fn only_version_conflicts_are_retryable() {
        let policy = ConflictRetryPolicy::default();
        let conflict = ArchiveError::VersionConflict {
            target_id: "1".to_string(),
        };
        let missing = ArchiveError::NotFound {
            target_id: "1".to_string(),
        };
        assert!(policy.should_retry(1, &conflict));
        assert!(policy.should_retry(5, &conflict));
        assert!(!policy.should_retry(6, &conflict));
        assert!(!policy.should_retry(1, &missing));
    }
}
