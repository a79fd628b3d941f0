//! # forgequeue-resilience
//!
//! Resilience patterns used around the task queue's external I/O: circuit
//! breaking, transport-level retry with backoff, and timeout wrapping for
//! distributed-lock and event-store calls.

pub mod circuit_breaker;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::*;
pub use retry::*;
pub use timeout::*;
