//! Task queue error types.

use thiserror::Error;

/// Result type for task queue operations.
pub type TaskQueueResult<T> = Result<T, TaskQueueError>;

/// Task queue domain errors.
#[derive(Debug, Error)]
pub enum TaskQueueError {
    /// Malformed job or configuration; the caller should fix its input.
    #[error("validation failed: {0}")]
    ValidationError(String),

    /// `unique_key` is already held by a non-terminal job.
    #[error("unique key already held: {0}")]
    DuplicateUnique(String),

    /// Adding the edge(s) would create a dependency cycle.
    #[error("circular dependency: {}", cycle.join(" -> "))]
    CircularDependency {
        /// The cycle path, starting and ending at the same job id.
        cycle: Vec<String>,
    },

    /// Operation referenced an id that does not exist.
    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// `depends_on` names an id that is not a known job.
    #[error("unknown dependency: job {job_id} depends on unknown job {dependency_id}")]
    UnknownDependency { job_id: String, dependency_id: String },

    /// Requested status transition is not permitted from the current state.
    #[error("illegal state transition for job {job_id}: {from} -> {to}")]
    IllegalState {
        job_id: String,
        from: String,
        to: String,
    },

    /// Worker cannot accept another job at its current concurrency.
    #[error("worker {0} is at capacity")]
    AtCapacity(String),

    /// Handler exceeded its deadline.
    #[error("job {job_id} timed out after {timeout_ms}ms")]
    TimeoutError { job_id: String, timeout_ms: u64 },

    /// Opaque handler failure.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// Distributed lock acquire/extend/release failed.
    #[error("lock error: {0}")]
    LockError(String),

    /// Storage/network error, retryable at the transport layer.
    #[error("transient backend error: {0}")]
    TransientBackendError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error (optional persistence seam).
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error (optional persistence seam).
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskQueueError {
    /// Returns true if this error is retryable by the retry engine.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskQueueError::HandlerError(_)
                | TaskQueueError::TimeoutError { .. }
                | TaskQueueError::TransientBackendError(_)
                | TaskQueueError::Redis(_)
                | TaskQueueError::Pool(_)
        )
    }

    /// Returns true if this error should bypass retries and route straight to the DLQ.
    pub fn should_dlq(&self) -> bool {
        matches!(
            self,
            TaskQueueError::ValidationError(_) | TaskQueueError::Configuration(_)
        )
    }

    /// Builds a `CircularDependency` error from a cycle path of job ids.
    pub fn circular_dependency(cycle: Vec<String>) -> Self {
        TaskQueueError::CircularDependency { cycle }
    }

    /// Builds an `IllegalState` error describing a rejected transition.
    pub fn illegal_state(
        job_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        TaskQueueError::IllegalState {
            job_id: job_id.into(),
            from: from.into(),
            to: to.into(),
        }
    }
}

impl From<forgequeue_core::CoreError> for TaskQueueError {
    fn from(err: forgequeue_core::CoreError) -> Self {
        match err {
            forgequeue_core::CoreError::Configuration(msg) => TaskQueueError::Configuration(msg),
            forgequeue_core::CoreError::Timeout(msg) => TaskQueueError::TransientBackendError(msg),
            other => TaskQueueError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(TaskQueueError::TransientBackendError("x".into()).is_retryable());
        assert!(!TaskQueueError::ValidationError("x".into()).is_retryable());
    }

    #[test]
    fn dlq_classification() {
        assert!(TaskQueueError::ValidationError("x".into()).should_dlq());
        assert!(!TaskQueueError::HandlerError("x".into()).should_dlq());
    }

    #[test]
    fn circular_dependency_message_contains_path() {
        let err = TaskQueueError::circular_dependency(vec!["a".into(), "b".into(), "a".into()]);
        assert!(err.to_string().contains("a -> b -> a"));
    }
}
