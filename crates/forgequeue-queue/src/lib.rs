//! Forgequeue - Distributed Task Queue Engine
//!
//! An in-memory, Redis-recoverable task queue with:
//! - Priority scheduling with starvation-resistant weighted-fair dequeue
//! - Delay, cron, and retry scheduling with per-job timezone support
//! - DAG job dependencies with cycle rejection and completion cascade
//! - Per-job uniqueness keys and atomic/best-effort bulk submission
//! - Retry strategies (fixed/exponential/custom) with dead-letter routing
//! - Worker capacity tracking, heartbeat eviction, and in-flight reassignment
//! - Leader election and load-aware work stealing primitives
//! - Metrics counters/gauges/histograms and lifecycle event hooks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Forgequeue Architecture                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  submit() / submit_atomic() / submit_best_effort()               │
//! │     │                                                            │
//! │     ▼                                                            │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                      Coordinator                          │    │
//! │  │                                                            │    │
//! │  │   unique-key      DAG             delay/cron/retry        │    │
//! │  │   registry   ─►  graph  ─► holds   wheels  ─────────────┐ │    │
//! │  │                                                          │ │    │
//! │  │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐    │ │    │
//! │  │  │ Critical │ │  High    │ │ Normal   │ │ Low/Batch│ ◄──┘ │    │
//! │  │  │  queue   │ │  queue   │ │  queue   │ │  queues  │      │    │
//! │  │  └────┬─────┘ └────┬─────┘ └────┬─────┘ └────┬─────┘      │    │
//! │  │       └────────────┴────────────┴────────────┘            │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │                           │ get_next_job / complete_job           │
//! │                           ▼                                      │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                     Worker pool                           │    │
//! │  │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐    │    │
//! │  │  │ Worker 1 │ │ Worker 2 │ │ Worker 3 │ │ Worker N │    │    │
//! │  │  └────┬─────┘ └────┬─────┘ └────┬─────┘ └────┬─────┘    │    │
//! │  │       └────────────┴────────────┴────────────┘          │    │
//! │  │                        │                                 │    │
//! │  │              ┌─────────┴─────────┐                      │    │
//! │  │              ▼                   ▼                      │    │
//! │  │        ┌──────────┐       ┌─────────────┐               │    │
//! │  │        │ completed│       │ dead letter │               │    │
//! │  │        │   jobs   │       │    queue    │               │    │
//! │  │        └──────────┘       └─────────────┘               │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use forgequeue_queue::{Coordinator, Job, Priority, TaskQueueConfig};
//! use serde_json::json;
//!
//! let (coordinator, mut events) = Coordinator::new(TaskQueueConfig::default());
//!
//! let job = Job::new("send_email", json!({"to": "user@example.com"}))
//!     .with_priority(Priority::High);
//! coordinator.submit(job)?;
//!
//! coordinator.register_worker("worker-1", 4);
//! if let Some(job) = coordinator.get_next_job("worker-1", None).await {
//!     // execute job.payload, then report the outcome
//!     coordinator.complete_job("worker-1", &job.id, Ok(json!({"status": "sent"}))).await;
//! }
//! # Ok::<(), forgequeue_queue::TaskQueueError>(())
//! ```

pub mod alert;
pub mod config;
pub mod coordinator;
pub mod dependency;
pub mod error;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod redis;
pub mod retry;
pub mod scheduler;
pub mod stealing;
pub mod telemetry;
pub mod uniqueness;
pub mod worker;
pub mod worker_registry;

pub use alert::{AlertSink, NoopAlertSink, Severity, TracingAlertSink};
pub use config::TaskQueueConfig;
pub use coordinator::{Coordinator, CoordinatorStats};
pub use dependency::DependencyGraph;
pub use error::{TaskQueueError, TaskQueueResult};
pub use job::{Job, JobId, JobStatus, Priority};
pub use metrics::{register_metrics, EventHooks, JobEvent, JobMetrics, WorkerMetrics};
pub use queue::PriorityQueue;
pub use retry::{RetryConfig, RetryDecision, RetryEngine, RetryStrategy};
pub use scheduler::{CronRegistry, DelayWheel, RetryWheel};
pub use telemetry::{init_tracing, install_prometheus_exporter};
pub use uniqueness::UniquenessRegistry;
pub use worker::{Handler, JobSource, WorkerPool, WorkerPoolConfig, WorkerPoolStats};
pub use worker_registry::{WorkerInfo, WorkerRegistry, WorkerStatus, DEFAULT_HEARTBEAT_TIMEOUT};

/// Re-export of the types most callers need to submit and run jobs.
pub mod prelude {
    pub use crate::config::TaskQueueConfig;
    pub use crate::coordinator::Coordinator;
    pub use crate::error::{TaskQueueError, TaskQueueResult};
    pub use crate::job::{Job, JobId, JobStatus, Priority};
    pub use crate::worker::{Handler, JobSource};
}
