//! Alert sink: the out-of-band notification seam the coordinator emits to
//! when something needs a human, as distinct from the `metrics`/`EventHooks`
//! machinery that feeds dashboards and subscribers. No-op by default; a
//! `tracing`-backed implementation is provided for deployments with no
//! external alerting service.

use crate::job::JobId;
use serde_json::Value;
use std::fmt;

/// Alert severity, ordered least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Out-of-band notification sink. `job`/`worker` are the ids involved, if
/// any; `metadata` carries whatever structured context the caller has.
pub trait AlertSink: Send + Sync {
    fn emit(
        &self,
        severity: Severity,
        title: &str,
        message: &str,
        job: Option<&JobId>,
        worker: Option<&str>,
        metadata: Value,
    );
}

/// Discards every alert. The default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAlertSink;

impl AlertSink for NoopAlertSink {
    fn emit(&self, _severity: Severity, _title: &str, _message: &str, _job: Option<&JobId>, _worker: Option<&str>, _metadata: Value) {}
}

/// Logs each alert through `tracing`, at the level matching `severity`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(
        &self,
        severity: Severity,
        title: &str,
        message: &str,
        job: Option<&JobId>,
        worker: Option<&str>,
        metadata: Value,
    ) {
        let job = job.map(|id| id.to_string()).unwrap_or_default();
        let worker = worker.unwrap_or_default();

        match severity {
            Severity::Info => {
                tracing::info!(title, message, job_id = %job, worker_id = %worker, %metadata, "alert")
            }
            Severity::Warning => {
                tracing::warn!(title, message, job_id = %job, worker_id = %worker, %metadata, "alert")
            }
            Severity::Error | Severity::Critical => {
                tracing::error!(title, message, job_id = %job, worker_id = %worker, %metadata, "alert")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn noop_sink_accepts_every_severity_without_panicking() {
        let sink = NoopAlertSink;
        for severity in [Severity::Info, Severity::Warning, Severity::Error, Severity::Critical] {
            sink.emit(severity, "t", "m", None, None, json!({}));
        }
    }

    #[test]
    fn tracing_sink_accepts_job_and_worker_context() {
        let sink = TracingAlertSink;
        let job = JobId::new();
        sink.emit(
            Severity::Critical,
            "dlq depth high",
            "dead letter queue exceeded threshold",
            Some(&job),
            Some("worker-1"),
            json!({"depth": 42}),
        );
    }

    #[test]
    fn severity_ordering_is_least_to_most_urgent() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }
}
