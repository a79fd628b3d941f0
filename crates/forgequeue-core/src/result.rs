//! Result type aliases shared below the task-queue engine.

use crate::CoreError;

/// A specialized `Result` type for core-level operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// A boxed future returning a `CoreResult`.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = CoreResult<T>> + Send + 'a>>;
