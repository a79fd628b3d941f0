//! # forgequeue-config
//!
//! Layered configuration loading shared by the task-queue engine: files,
//! environment variables, and runtime refresh, built on the `config` and
//! `dotenvy` crates.

mod loader;

pub use loader::*;
