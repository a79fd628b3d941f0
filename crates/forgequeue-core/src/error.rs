//! Shared error type used across the workspace below the task-queue engine.

use thiserror::Error;

/// Foundational error type shared by the config and resilience crates.
///
/// The task-queue engine itself defines its own richer `TaskQueueError`
/// (see `forgequeue_queue::error`); this type exists for the handful of
/// cross-cutting concerns (configuration loading, circuit breakers, generic
/// timeouts) that sit below the engine and don't need queue-specific variants.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Resource not found.
    #[error("not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Input failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration could not be loaded or was invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A dependent external service returned an error.
    #[error("external service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    /// Circuit breaker is open for the named resource.
    #[error("service unavailable: circuit breaker open for {0}")]
    CircuitBreakerOpen(String),

    /// Operation exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Generic error wrapper for `anyhow`-produced errors at the edges.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Checks whether this error is worth retrying at the transport layer.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ExternalService { .. } | Self::CircuitBreakerOpen(_) | Self::Timeout(_)
        )
    }

    /// Checks whether this error should count toward tripping a circuit breaker.
    #[must_use]
    pub const fn should_trip_circuit_breaker(&self) -> bool {
        matches!(self, Self::ExternalService { .. } | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_errors() {
        assert!(CoreError::Timeout("slow".into()).is_retriable());
        assert!(!CoreError::Validation("bad".into()).is_retriable());
    }

    #[test]
    fn circuit_breaker_classification() {
        assert!(CoreError::ExternalService {
            service: "redis".into(),
            message: "down".into()
        }
        .should_trip_circuit_breaker());
        assert!(!CoreError::NotFound {
            resource_type: "job",
            id: "1".into()
        }
        .should_trip_circuit_breaker());
    }
}
