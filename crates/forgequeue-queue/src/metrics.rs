//! Metrics and event hooks for task queue monitoring.
//!
//! Counters/gauges/histograms are recorded through the `metrics` facade, so
//! any installed recorder (Prometheus exporter, statsd, etc.) receives them;
//! this crate only registers descriptions and names, never a specific
//! exporter. Hooks (`on_submit`/`on_retry`/`on_dlq`/`on_failure`) are
//! delivered over an unbounded channel so a slow subscriber never blocks the
//! coordinator.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Metric names for the task queue engine.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "forgequeue_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "forgequeue_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "forgequeue_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "forgequeue_jobs_retried_total";
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "forgequeue_jobs_dead_lettered_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "forgequeue_jobs_cancelled_total";
    pub const JOBS_TIMED_OUT_TOTAL: &str = "forgequeue_jobs_timed_out_total";
    pub const STEAL_ROUNDS_TOTAL: &str = "forgequeue_steal_rounds_total";
    pub const JOBS_STOLEN_TOTAL: &str = "forgequeue_jobs_stolen_total";

    pub const QUEUE_DEPTH: &str = "forgequeue_queue_depth";
    pub const JOBS_RUNNING: &str = "forgequeue_jobs_running";
    pub const DLQ_DEPTH: &str = "forgequeue_dlq_depth";
    pub const WORKERS_ACTIVE: &str = "forgequeue_workers_active";

    pub const JOB_DURATION_SECONDS: &str = "forgequeue_job_duration_seconds";
    pub const JOB_WAIT_TIME_SECONDS: &str = "forgequeue_job_wait_time_seconds";

    pub const LEADER_IS_SELF: &str = "forgequeue_leader_is_self";
}

/// Registers all metric descriptions with the installed recorder.
pub fn register_metrics() {
    describe_counter!(names::JOBS_SUBMITTED_TOTAL, "Total jobs submitted");
    describe_counter!(names::JOBS_COMPLETED_TOTAL, "Total jobs completed successfully");
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total job execution failures");
    describe_counter!(names::JOBS_RETRIED_TOTAL, "Total job retries scheduled");
    describe_counter!(names::JOBS_DEAD_LETTERED_TOTAL, "Total jobs routed to the DLQ");
    describe_counter!(names::JOBS_CANCELLED_TOTAL, "Total jobs cancelled");
    describe_counter!(names::JOBS_TIMED_OUT_TOTAL, "Total jobs that exceeded their deadline");
    describe_counter!(names::STEAL_ROUNDS_TOTAL, "Total work-stealing rounds run by the leader");
    describe_counter!(names::JOBS_STOLEN_TOTAL, "Total jobs reassigned by work stealing");

    describe_gauge!(names::QUEUE_DEPTH, "Current priority queue depth, labeled by priority");
    describe_gauge!(names::JOBS_RUNNING, "Current number of running jobs");
    describe_gauge!(names::DLQ_DEPTH, "Current dead-letter queue size");
    describe_gauge!(names::WORKERS_ACTIVE, "Current number of live worker nodes");
    describe_gauge!(names::LEADER_IS_SELF, "Whether this instance currently holds leadership");

    describe_histogram!(names::JOB_DURATION_SECONDS, "Job execution duration in seconds");
    describe_histogram!(names::JOB_WAIT_TIME_SECONDS, "Job wait time in the priority queue, in seconds");
}

/// Job lifecycle metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    pub fn submitted(job_name: &str, priority: &str) {
        counter!(
            names::JOBS_SUBMITTED_TOTAL,
            "job_name" => job_name.to_string(),
            "priority" => priority.to_string()
        )
        .increment(1);
    }

    pub fn completed(job_name: &str, priority: &str, duration: Duration) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            "job_name" => job_name.to_string(),
            "priority" => priority.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_name" => job_name.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    pub fn failed(job_name: &str, priority: &str, duration: Duration) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "job_name" => job_name.to_string(),
            "priority" => priority.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "job_name" => job_name.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    pub fn retried(job_name: &str, attempt: u32) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "job_name" => job_name.to_string(),
            "attempt" => attempt.to_string()
        )
        .increment(1);
    }

    pub fn dead_lettered(job_name: &str, reason: &str) {
        counter!(
            names::JOBS_DEAD_LETTERED_TOTAL,
            "job_name" => job_name.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    pub fn cancelled(job_name: &str) {
        counter!(names::JOBS_CANCELLED_TOTAL, "job_name" => job_name.to_string()).increment(1);
    }

    pub fn timed_out(job_name: &str) {
        counter!(names::JOBS_TIMED_OUT_TOTAL, "job_name" => job_name.to_string()).increment(1);
    }

    pub fn wait_time(priority: &str, wait_time: Duration) {
        histogram!(names::JOB_WAIT_TIME_SECONDS, "priority" => priority.to_string())
            .record(wait_time.as_secs_f64());
    }

    pub fn queue_depth_by_priority(depths: [usize; 5]) {
        const LABELS: [&str; 5] = ["critical", "high", "normal", "low", "batch"];
        for (label, depth) in LABELS.iter().zip(depths) {
            gauge!(names::QUEUE_DEPTH, "priority" => *label).set(depth as f64);
        }
    }

    pub fn update_counts(running: u64, dlq_depth: u64) {
        gauge!(names::JOBS_RUNNING).set(running as f64);
        gauge!(names::DLQ_DEPTH).set(dlq_depth as f64);
    }
}

/// Worker/leader metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    pub fn update_active_workers(count: u64) {
        gauge!(names::WORKERS_ACTIVE).set(count as f64);
    }

    pub fn update_leader_status(is_leader: bool) {
        gauge!(names::LEADER_IS_SELF).set(if is_leader { 1.0 } else { 0.0 });
    }

    pub fn steal_round(jobs_stolen: u64) {
        counter!(names::STEAL_ROUNDS_TOTAL).increment(1);
        counter!(names::JOBS_STOLEN_TOTAL).increment(jobs_stolen);
    }
}

/// One lifecycle event, delivered to hook subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEvent {
    Submitted { job_id: String, job_name: String },
    Retry { job_id: String, job_name: String, attempt: u32, delay_ms: u64 },
    Dlq { job_id: String, job_name: String, reason: String },
    Failure { job_id: String, job_name: String, reason: String },
}

/// Non-blocking fan-out for `on_submit`/`on_retry`/`on_dlq`/`on_failure`.
/// Hooks are invoked by pushing onto an unbounded channel rather than
/// calling subscriber code synchronously, so a slow consumer never stalls
/// the coordinator (§4.10).
#[derive(Clone)]
pub struct EventHooks {
    sender: UnboundedSender<JobEvent>,
}

impl EventHooks {
    pub fn new() -> (Self, UnboundedReceiver<JobEvent>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_metrics_does_not_panic() {
        register_metrics();
    }

    #[test]
    fn recorder_calls_do_not_panic_without_an_installed_recorder() {
        JobMetrics::submitted("send_email", "normal");
        JobMetrics::completed("send_email", "normal", Duration::from_millis(50));
        JobMetrics::failed("send_email", "normal", Duration::from_millis(10));
        JobMetrics::queue_depth_by_priority([1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn emitted_events_are_received_in_order() {
        let (hooks, mut rx) = EventHooks::new();
        hooks.emit(JobEvent::Submitted {
            job_id: "a".into(),
            job_name: "send_email".into(),
        });
        hooks.emit(JobEvent::Dlq {
            job_id: "a".into(),
            job_name: "send_email".into(),
            reason: "exhausted".into(),
        });

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, JobEvent::Submitted { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, JobEvent::Dlq { .. }));
    }
}
