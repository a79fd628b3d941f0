//! # forgequeue-core
//!
//! Shared error type and cross-cutting traits used by the configuration and
//! resilience crates that sit below the task-queue engine.

pub mod error;
pub mod result;
pub mod traits;

pub use error::*;
pub use result::*;
pub use traits::*;
