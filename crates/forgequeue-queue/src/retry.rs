//! Retry strategy evaluation and dead-letter routing decisions.

use serde::{Deserialize, Serialize};

/// Retry strategy enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Fixed delay between retries.
    Fixed,
    /// Exponential backoff with optional jitter.
    Exponential,
    /// Explicit per-attempt delay table.
    Custom,
}

/// Retry configuration attached to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retry strategy.
    pub strategy: RetryStrategy,

    /// Maximum number of attempts (including the initial one).
    pub max_attempts: u32,

    /// Base delay in milliseconds (FIXED, EXPONENTIAL).
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds, caps EXPONENTIAL growth.
    pub max_delay_ms: u64,

    /// Add random jitter to the computed delay.
    pub jitter: bool,

    /// Explicit delay table for the CUSTOM strategy.
    pub custom_delays_ms: Option<Vec<u64>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::exponential(3, 1000, 3_600_000)
    }
}

impl RetryConfig {
    /// Fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            max_attempts,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            jitter: false,
            custom_delays_ms: None,
        }
    }

    /// Exponential backoff policy.
    pub fn exponential(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            jitter: true,
            custom_delays_ms: None,
        }
    }

    /// Explicit per-attempt delay table.
    pub fn custom(delays_ms: Vec<u64>) -> Self {
        let max_attempts = delays_ms.len() as u32;
        Self {
            strategy: RetryStrategy::Custom,
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: delays_ms.iter().copied().max().unwrap_or(0),
            jitter: false,
            custom_delays_ms: Some(delays_ms),
        }
    }

    /// Validates the config against the invariants in the job data model.
    pub fn validate(&self) -> Result<(), crate::error::TaskQueueError> {
        use crate::error::TaskQueueError;

        if self.max_attempts == 0 {
            return Err(TaskQueueError::ValidationError(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(TaskQueueError::ValidationError(
                "max_delay_ms must be >= base_delay_ms".to_string(),
            ));
        }
        if self.strategy == RetryStrategy::Custom {
            match &self.custom_delays_ms {
                Some(delays) if !delays.is_empty() => {}
                _ => {
                    return Err(TaskQueueError::ValidationError(
                        "CUSTOM strategy requires a non-empty custom_delays_ms".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Upper bound on the number of retries (attempts beyond the first).
    ///
    /// `max_attempts` counts total executions including the initial one; the
    /// last attempt's failure is the one that routes to the DLQ rather than
    /// scheduling one more retry, so the number of *retries* a job may use is
    /// `max_attempts - 1` (or `len(custom_delays_ms)` under CUSTOM).
    fn max_retries(&self) -> u32 {
        match self.strategy {
            RetryStrategy::Custom => self
                .custom_delays_ms
                .as_ref()
                .map(|d| d.len() as u32)
                .unwrap_or(0),
            _ => self.max_attempts.saturating_sub(1),
        }
    }

    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries()
    }

    fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let base = match self.strategy {
            RetryStrategy::Fixed => self.base_delay_ms,
            RetryStrategy::Exponential => {
                let scaled = self.base_delay_ms.saturating_mul(1u64 << attempt.min(62));
                scaled.min(self.max_delay_ms)
            }
            RetryStrategy::Custom => self
                .custom_delays_ms
                .as_ref()
                .and_then(|d| d.get(attempt as usize))
                .copied()
                .unwrap_or(self.max_delay_ms),
        };

        if self.jitter {
            base.saturating_add(jitter_component(base))
        } else {
            base
        }
    }
}

/// Outcome of evaluating a job failure against its retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDecision {
    /// Whether the job should be retried.
    pub retry: bool,
    /// Delay before the retry fires, in milliseconds. Zero when `retry` is false.
    pub delay_ms: u64,
    /// Whether the job should be routed to the dead-letter queue instead.
    pub to_dlq: bool,
    /// Human-readable reason, surfaced to callers and logs.
    pub reason: String,
}

/// Evaluates retry decisions for a failed job attempt.
pub struct RetryEngine;

impl RetryEngine {
    /// Evaluates whether `attempt` (the attempt count *before* this failure)
    /// should be retried, and if so after how long.
    pub fn evaluate(config: &RetryConfig, attempt: u32, error: &crate::error::TaskQueueError) -> RetryDecision {
        if error.should_dlq() {
            return RetryDecision {
                retry: false,
                delay_ms: 0,
                to_dlq: true,
                reason: format!("error classified as non-retryable: {error}"),
            };
        }

        if config.should_retry(attempt) {
            RetryDecision {
                retry: true,
                delay_ms: config.delay_for_attempt(attempt),
                to_dlq: false,
                reason: format!("attempt {attempt} eligible for retry under {:?}", config.strategy),
            }
        } else {
            RetryDecision {
                retry: false,
                delay_ms: 0,
                to_dlq: true,
                reason: format!("attempt {attempt} exhausted max_attempts={}", config.max_attempts),
            }
        }
    }
}

/// Uniform jitter in `[0, 0.5 * base]`, seeded from the clock like the
/// reference crate's backoff loop.
fn jitter_component(base: u64) -> u64 {
    use std::time::SystemTime;

    let range = base / 2;
    if range == 0 {
        return 0;
    }

    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let a: u64 = 6364136223846793005;
    let c: u64 = 1442695040888963407;
    seed.wrapping_mul(a).wrapping_add(c) % (range + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskQueueError;

    #[test]
    fn fixed_retry_window() {
        let config = RetryConfig::fixed(4, 5000);
        assert!(config.should_retry(0));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
        assert_eq!(config.delay_for_attempt(1), 5000);
    }

    #[test]
    fn exponential_backoff_matches_scenario() {
        // S3: base=100ms, max=10000ms, jitter=false, max_attempts=4.
        let config = RetryConfig {
            strategy: RetryStrategy::Exponential,
            max_attempts: 4,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter: false,
            custom_delays_ms: None,
        };

        let err = TaskQueueError::TransientBackendError("boom".into());

        let d0 = RetryEngine::evaluate(&config, 0, &err);
        assert!(d0.retry);
        assert_eq!(d0.delay_ms, 100);

        let d1 = RetryEngine::evaluate(&config, 1, &err);
        assert!(d1.retry);
        assert_eq!(d1.delay_ms, 200);

        let d2 = RetryEngine::evaluate(&config, 2, &err);
        assert!(d2.retry);
        assert_eq!(d2.delay_ms, 400);

        // Fourth failure (attempt index 3) exhausts the policy -> DLQ.
        let d3 = RetryEngine::evaluate(&config, 3, &err);
        assert!(!d3.retry);
        assert!(d3.to_dlq);
    }

    #[test]
    fn max_delay_cap_applies() {
        let config = RetryConfig::exponential(20, 1000, 10_000);
        assert_eq!(config.delay_for_attempt(10), 10_000);
    }

    #[test]
    fn custom_strategy_uses_table_then_exhausts() {
        let config = RetryConfig::custom(vec![10, 20, 30]);
        assert!(config.should_retry(0));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
        assert_eq!(config.delay_for_attempt(1), 20);
    }

    #[test]
    fn validate_rejects_empty_custom_table() {
        let config = RetryConfig {
            strategy: RetryStrategy::Custom,
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
            custom_delays_ms: None,
        };
        assert!(config.validate().is_err());
    }
}
