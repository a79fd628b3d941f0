//! Coordinator: the single external-facing object composing the priority
//! queue, time scheduler, dependency graph, uniqueness registry, retry
//! engine, worker registry, and metrics/hooks into one job-submission and
//! job-completion API.

use crate::alert::{AlertSink, NoopAlertSink, Severity};
use crate::config::TaskQueueConfig;
use crate::dependency::DependencyGraph;
use crate::error::{TaskQueueError, TaskQueueResult};
use crate::job::{Job, JobId, JobStatus, Priority};
use crate::metrics::{EventHooks, JobEvent, JobMetrics, WorkerMetrics};
use crate::queue::PriorityQueue;
use crate::retry::RetryEngine;
use crate::scheduler::{CronRegistry, DelayWheel, RetryWheel};
use crate::stealing::{is_overloaded, is_underloaded, sort_overloaded_desc, sort_underloaded_asc};
use crate::uniqueness::UniquenessRegistry;
use crate::worker::JobSource;
use crate::worker_registry::WorkerRegistry;
use async_trait::async_trait;
use forgequeue_core::{HealthCheck, HealthStatus};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::Critical => "critical",
        Priority::High => "high",
        Priority::Normal => "normal",
        Priority::Low => "low",
        Priority::Batch => "batch",
    }
}

/// Point-in-time snapshot of coordinator state, as surfaced by `get_stats`.
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    pub queue_depth_by_priority: [usize; 5],
    pub queue_depth: usize,
    pub dlq_depth: usize,
    pub running: usize,
    pub active_workers: usize,
}

/// Composes C2 (priority queue), C3 (time scheduler), C4 (dependency graph),
/// C6 (worker registry), C7 (stealing primitives are wired in by the binary
/// that owns leader election), C8 (uniqueness), and C10 (metrics/hooks) into
/// the one object workers and submitters talk to. Owns the authoritative job
/// store; every other component indexes jobs by id only.
pub struct Coordinator {
    jobs: RwLock<HashMap<JobId, Job>>,
    priority_queue: PriorityQueue,
    delay_wheel: DelayWheel,
    retry_wheel: RetryWheel,
    cron: CronRegistry,
    graph: DependencyGraph,
    uniqueness: UniquenessRegistry,
    dlq: Mutex<Vec<JobId>>,
    workers: WorkerRegistry,
    config: TaskQueueConfig,
    hooks: EventHooks,
    alert_sink: Box<dyn AlertSink>,
}

impl Coordinator {
    pub fn new(config: TaskQueueConfig) -> (Self, UnboundedReceiver<JobEvent>) {
        let (hooks, receiver) = EventHooks::new();
        let priority_queue = PriorityQueue::new((&config.priority).into());
        let workers = WorkerRegistry::with_timeout(config.worker.heartbeat_timeout());

        let coordinator = Self {
            jobs: RwLock::new(HashMap::new()),
            priority_queue,
            delay_wheel: DelayWheel::new(),
            retry_wheel: RetryWheel::new(),
            cron: CronRegistry::new(),
            graph: DependencyGraph::new(),
            uniqueness: UniquenessRegistry::new(),
            dlq: Mutex::new(Vec::new()),
            workers,
            config,
            hooks,
            alert_sink: Box::new(NoopAlertSink),
        };
        (coordinator, receiver)
    }

    /// Replaces the alert sink, e.g. with `alert::TracingAlertSink` or a
    /// caller-supplied implementation wired to an external alerting service.
    pub fn with_alert_sink(mut self, sink: impl AlertSink + 'static) -> Self {
        self.alert_sink = Box::new(sink);
        self
    }

    /// Submits a job built via `Job::new(...).with_*(...)`. Routes per §4.9:
    /// unique key, then dependency graph, then cron/delay/hold/enqueue, in
    /// that order. On a `unique_key`/`depends_on` failure no other state is
    /// touched — the uniqueness claim (if any) is rolled back.
    pub fn submit(&self, job: Job) -> TaskQueueResult<JobId> {
        job.validate()?;
        let id = job.id.clone();
        let has_deps = !job.depends_on.is_empty();

        if has_deps {
            let jobs = self.jobs.read();
            if let Some(missing) = job.depends_on.iter().find(|dep| !jobs.contains_key(dep)) {
                return Err(TaskQueueError::UnknownDependency {
                    job_id: id.to_string(),
                    dependency_id: missing.to_string(),
                });
            }
        }

        if let Some(key) = &job.unique_key {
            self.uniqueness.acquire(key, &id)?;
        }

        if has_deps {
            if let Err(err) = self.graph.add_job(id.clone(), job.depends_on.clone(), job.status) {
                if let Some(key) = &job.unique_key {
                    self.uniqueness.release(key, &id);
                }
                return Err(err);
            }
        }

        let (name, priority) = (job.name.clone(), job.priority);
        let is_cron = job.cron_expression.is_some();
        let is_delayed = job.delay_ms > 0 || job.scheduled_at.is_some();

        // Stored up front so every routing branch (and any failure within
        // it) can be rolled back uniformly through `rollback_submission`.
        self.jobs.write().insert(id.clone(), job);

        let routed = if is_cron {
            self.jobs.write().get_mut(&id).map(|j| j.transition(JobStatus::Scheduled));
            let template = self.jobs.read().get(&id).cloned();
            template
                .ok_or_else(|| TaskQueueError::Internal("job vanished after insert".to_string()))
                .and_then(|job| self.cron.register(job).map(|_| ()))
        } else if is_delayed {
            let run_at = self
                .jobs
                .read()
                .get(&id)
                .map(|job| self.delay_wheel.schedule(job));
            if run_at.is_some() {
                self.jobs.write().get_mut(&id).map(|j| j.transition(JobStatus::Scheduled));
            }
            Ok(())
        } else if has_deps && self.graph.has_unmet_dependencies(&id) {
            // Held PENDING in the graph only; nothing further to do.
            Ok(())
        } else {
            self.priority_queue.enqueue(id.clone(), priority)
        };

        if let Err(err) = routed {
            self.rollback_submission(&id);
            return Err(err);
        }

        JobMetrics::submitted(&name, priority_label(priority));
        self.hooks.emit(JobEvent::Submitted {
            job_id: id.to_string(),
            job_name: name,
        });

        Ok(id)
    }

    /// Submits a batch of jobs in *atomic* mode: every job is validated
    /// (uniqueness preflight, dependency cycle check across the whole batch)
    /// before any is enqueued. On any failure, no job is enqueued, no
    /// uniqueness key is held, and no graph edge survives.
    pub fn submit_atomic(&self, jobs: Vec<Job>) -> (Vec<JobId>, Vec<(JobId, String)>) {
        let mut committed: Vec<JobId> = Vec::new();

        for job in jobs {
            let id = job.id.clone();
            match self.submit(job) {
                Ok(_) => committed.push(id),
                Err(err) => {
                    for id in &committed {
                        self.rollback_submission(id);
                    }
                    return (Vec::new(), vec![(id, err.to_string())]);
                }
            }
        }

        (committed, Vec::new())
    }

    /// Submits a batch of jobs in *best-effort* mode: each job is attempted
    /// independently, with failures collected rather than rolled back.
    pub fn submit_best_effort(&self, jobs: Vec<Job>) -> (Vec<JobId>, Vec<(JobId, String)>) {
        let mut successful = Vec::new();
        let mut failed = Vec::new();

        for job in jobs {
            let id = job.id.clone();
            match self.submit(job) {
                Ok(id) => successful.push(id),
                Err(err) => failed.push((id, err.to_string())),
            }
        }

        (successful, failed)
    }

    /// Undoes a committed submission for atomic-batch rollback: removes the
    /// job from wherever it currently sits and releases its uniqueness key.
    fn rollback_submission(&self, id: &JobId) {
        self.priority_queue.remove(id);
        self.delay_wheel.cancel(id);
        self.cron.unregister(id);
        self.graph.remove_job(id);

        let unique_key = self.jobs.write().remove(id).and_then(|j| j.unique_key);
        if let Some(key) = unique_key {
            self.uniqueness.release(&key, id);
        }
    }

    /// Drains due delay/cron/retry entries into the priority queue, honoring
    /// dependencies, then returns one job or `None` if the queue is empty
    /// after `timeout` (or immediately, if `timeout` is `None`).
    async fn next_ready(&self, timeout: Option<Duration>) -> Option<(Priority, JobId)> {
        self.drain_due();
        self.priority_queue.dequeue(timeout).await
    }

    fn drain_due(&self) {
        let now = Utc::now();

        for id in self.delay_wheel.pop_due(now) {
            if let Some(job) = self.jobs.write().get_mut(&id) {
                let _ = job.transition(JobStatus::Pending);
            }
            self.ready_or_hold(&id);
        }

        for job in self.cron.pop_due(now) {
            let id = job.id.clone();
            self.jobs.write().insert(id.clone(), job);
            self.ready_or_hold(&id);
        }

        for id in self.retry_wheel.pop_due(now) {
            if let Some(job) = self.jobs.write().get_mut(&id) {
                let _ = job.transition(JobStatus::Pending);
            }
            self.ready_or_hold(&id);
        }
    }

    fn ready_or_hold(&self, id: &JobId) {
        if self.graph.has_unmet_dependencies(id) {
            return;
        }
        let priority = self.jobs.read().get(id).map(|j| j.priority);
        if let Some(priority) = priority {
            let _ = self.priority_queue.enqueue(id.clone(), priority);
        }
    }

    /// Removes a job from wherever it's waiting; fails if already RUNNING.
    /// Releases its uniqueness key on success.
    pub fn cancel_job(&self, id: &JobId) -> TaskQueueResult<()> {
        let (name, unique_key) = {
            let mut jobs = self.jobs.write();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| TaskQueueError::UnknownJob(id.to_string()))?;

            if job.status == JobStatus::Running {
                return Err(TaskQueueError::illegal_state(
                    id.to_string(),
                    job.status.to_string(),
                    "cancelled",
                ));
            }

            job.transition(JobStatus::Failed)?;
            (job.name.clone(), job.unique_key.clone())
        };

        self.priority_queue.remove(id);
        self.delay_wheel.cancel(id);
        self.retry_wheel.cancel(id);
        self.cron.unregister(id);

        if let Some(key) = unique_key {
            self.uniqueness.release(&key, id);
        }

        JobMetrics::cancelled(&name);
        Ok(())
    }

    /// Re-prioritizes a job, but only while it's still sitting in the
    /// priority queue (not yet dequeued, not delayed/cron/retry-scheduled).
    pub fn update_priority(&self, id: &JobId, new_priority: Priority) -> TaskQueueResult<()> {
        if !self.jobs.read().contains_key(id) {
            return Err(TaskQueueError::UnknownJob(id.to_string()));
        }
        if !self.priority_queue.update_priority(id, new_priority) {
            return Err(TaskQueueError::ValidationError(format!(
                "job {id} is not currently in the priority queue"
            )));
        }
        if let Some(job) = self.jobs.write().get_mut(id) {
            job.priority = new_priority;
        }
        Ok(())
    }

    pub fn register_worker(&self, worker_id: &str, max_concurrent: u32) -> u64 {
        self.workers.register(worker_id, max_concurrent)
    }

    /// Registers a worker with its full `WorkerNode` identity (name/host/port).
    pub fn register_worker_node(
        &self,
        worker_id: &str,
        name: &str,
        host: &str,
        port: u16,
        max_concurrent: u32,
    ) -> u64 {
        self.workers.register_with_details(worker_id, name, host, port, max_concurrent)
    }

    pub fn worker_heartbeat(&self, worker_id: &str) -> bool {
        self.workers.heartbeat(worker_id)
    }

    /// Begins a graceful drain for `worker_id`: it finishes its in-flight
    /// jobs but is no longer a valid `assign`/steal-thief target. Pair with
    /// `mark_worker_stopped` once the pool confirms `shutdown_timeout` has
    /// elapsed (via `WorkerPool::stop`'s reclaim path, or cleanly).
    pub fn request_worker_shutdown(&self, worker_id: &str) -> bool {
        self.workers.request_shutdown(worker_id)
    }

    pub fn mark_worker_stopped(&self, worker_id: &str) -> bool {
        self.workers.mark_stopped(worker_id)
    }

    /// Records whether `worker_id` currently holds leadership, per §4.7's
    /// exactly-one-leader invariant. Called by whoever polls `LeaderElection`.
    pub fn set_worker_leader(&self, worker_id: &str, is_leader: bool) -> bool {
        self.workers.set_leader(worker_id, is_leader)
    }

    /// Evicts workers whose heartbeat has expired and re-enqueues every job
    /// they held in-flight: status → PENDING, `worker_id` cleared, same
    /// priority. The leader calls this on a timer.
    pub fn reap_stale_workers(&self) -> usize {
        let evicted = self.workers.evict_stale();
        let mut reassigned = 0;

        for worker in evicted {
            warn!(worker_id = %worker.id, "reassigning jobs from evicted worker");
            self.alert_sink.emit(
                Severity::Warning,
                "worker evicted",
                &format!("worker {} missed its heartbeat and was evicted", worker.id),
                None,
                Some(&worker.id),
                serde_json::json!({ "in_flight_jobs": worker.current_job_count() }),
            );
            for job_id in worker.current_jobs() {
                if self.reassign_job_to_pending(job_id) {
                    reassigned += 1;
                }
            }
        }

        reassigned
    }

    /// Moves `id` from RUNNING back to PENDING and re-enqueues it at its
    /// existing priority, clearing the `worker_id` claim. Returns `false` if
    /// the job is gone or the transition is illegal (already terminal).
    /// Shared by `reap_stale_workers` and the `JobSource::reclaim` override
    /// a worker pool falls back to when a shutdown grace period elapses with
    /// the job still in flight.
    fn reassign_job_to_pending(&self, id: &JobId) -> bool {
        let priority = {
            let mut jobs = self.jobs.write();
            let Some(job) = jobs.get_mut(id) else {
                return false;
            };
            job.worker_id = None;
            if job.transition(JobStatus::Pending).is_err() {
                return false;
            }
            job.priority
        };
        self.priority_queue.enqueue(id.clone(), priority).is_ok()
    }

    /// Runs one leader-driven steal round per §4.7: pairs each overloaded
    /// worker (highest load first) with an underloaded one (lowest load
    /// first) and moves at most one not-yet-running job per pair. Never
    /// touches a RUNNING job. Returns the number of jobs actually moved.
    ///
    /// The caller is responsible for gating this behind leader election, the
    /// same way it already gates `reap_stale_workers`. Under the synchronous
    /// dispatch `get_next_job` uses — assign then transition to RUNNING in
    /// one call — a job spends at most a moment assigned-but-not-running, so
    /// in practice this rarely finds anything to steal; it exists for any
    /// dispatch path that separates assignment from execution start.
    pub fn run_steal_round(&self) -> usize {
        let threshold = self.config.steal.threshold;
        let workers = self.workers.all();

        let overloaded = sort_overloaded_desc(
            workers
                .iter()
                .filter(|w| is_overloaded(w.current_job_count(), w.max_concurrent as usize, threshold))
                .map(|w| (w.id.clone(), w.load()))
                .collect(),
        );
        let underloaded = sort_underloaded_asc(
            workers
                .iter()
                .filter(|w| is_underloaded(w.current_job_count(), w.max_concurrent as usize, threshold))
                .map(|w| (w.id.clone(), w.load()))
                .collect(),
        );

        let mut stolen = 0;
        let mut thieves = underloaded.into_iter();

        for (victim_id, _) in overloaded {
            let Some((thief_id, _)) = thieves.next() else {
                break;
            };
            if victim_id == thief_id {
                continue;
            }

            let stealable = self.workers.get(&victim_id).and_then(|victim| {
                let jobs = self.jobs.read();
                victim
                    .current_jobs()
                    .find(|id| {
                        jobs.get(*id)
                            .map(|job| job.status != JobStatus::Running)
                            .unwrap_or(false)
                    })
                    .cloned()
            });

            let Some(job_id) = stealable else {
                continue;
            };

            if self.workers.reassign(&victim_id, &thief_id, &job_id).is_ok() {
                if let Some(job) = self.jobs.write().get_mut(&job_id) {
                    job.worker_id = Some(thief_id.clone());
                }
                info!(job_id = %job_id, from = %victim_id, to = %thief_id, "stole job between workers");
                stolen += 1;
            }
        }

        if stolen > 0 {
            WorkerMetrics::steal_round(stolen as u64);
        }
        stolen
    }

    pub fn get_stats(&self) -> CoordinatorStats {
        let queue_depth_by_priority = self.priority_queue.size_by_priority();
        let running = self
            .jobs
            .read()
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count();
        let dlq_depth = self.dlq.lock().len();
        let active_workers = self.workers.active_count();

        JobMetrics::queue_depth_by_priority(queue_depth_by_priority);
        JobMetrics::update_counts(running as u64, dlq_depth as u64);
        WorkerMetrics::update_active_workers(active_workers as u64);

        CoordinatorStats {
            queue_depth_by_priority,
            queue_depth: queue_depth_by_priority.iter().sum(),
            dlq_depth,
            running,
            active_workers,
        }
    }

    /// Purges terminal jobs (COMPLETED/FAILED/DEAD) from the job store once
    /// they've aged past their configured retention window, bounding
    /// unbounded memory growth for a long-running coordinator. DLQ entries
    /// use `queue.dlq.retention_secs`; everything else uses
    /// `queue.retention_secs`.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let queue_retention = ChronoDuration::seconds(self.config.queue.retention_secs as i64);
        let dlq_retention = ChronoDuration::seconds(self.config.queue.dlq.retention_secs as i64);
        let dlq_ids: HashSet<JobId> = self.dlq.lock().iter().cloned().collect();

        let expired: Vec<JobId> = {
            let jobs = self.jobs.read();
            jobs.values()
                .filter(|job| {
                    let Some(completed_at) = job.completed_at else {
                        return false;
                    };
                    let retention = if dlq_ids.contains(&job.id) {
                        dlq_retention
                    } else {
                        queue_retention
                    };
                    now - completed_at > retention
                })
                .map(|job| job.id.clone())
                .collect()
        };

        let mut jobs = self.jobs.write();
        for id in &expired {
            jobs.remove(id);
        }
        drop(jobs);

        let expired_set: HashSet<&JobId> = expired.iter().collect();
        self.dlq.lock().retain(|id| !expired_set.contains(id));

        expired.len()
    }

    pub fn get_dlq(&self) -> Vec<Job> {
        let dlq = self.dlq.lock();
        let jobs = self.jobs.read();
        dlq.iter().filter_map(|id| jobs.get(id).cloned()).collect()
    }

    /// Moves `id` out of the DLQ back to PENDING and re-enqueues it,
    /// re-acquiring its uniqueness key if it carries one.
    pub fn requeue_from_dlq(&self, id: &JobId, reset_attempts: bool) -> TaskQueueResult<()> {
        {
            let mut dlq = self.dlq.lock();
            let pos = dlq
                .iter()
                .position(|x| x == id)
                .ok_or_else(|| TaskQueueError::UnknownJob(id.to_string()))?;
            dlq.remove(pos);
        }

        let (priority, unique_key) = {
            let mut jobs = self.jobs.write();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| TaskQueueError::UnknownJob(id.to_string()))?;
            job.transition(JobStatus::Pending)?;
            if reset_attempts {
                job.attempt = 0;
            }
            job.last_error = None;
            job.worker_id = None;
            (job.priority, job.unique_key.clone())
        };

        if let Some(key) = &unique_key {
            self.uniqueness.acquire(key, id)?;
        }

        self.priority_queue.enqueue(id.clone(), priority)
    }

    async fn complete_success(&self, worker_id: &str, id: &JobId) {
        let outcome = {
            let mut jobs = self.jobs.write();
            let Some(job) = jobs.get_mut(id) else {
                return;
            };
            if job.transition(JobStatus::Completed).is_err() {
                return;
            }
            (
                job.name.clone(),
                job.priority,
                job.started_at,
                job.unique_key.clone(),
            )
        };
        let (name, priority, started_at, unique_key) = outcome;

        self.workers.complete(worker_id, id, true);

        for child in self.graph.mark_completed(id) {
            if self.graph.has_unmet_dependencies(&child) {
                continue;
            }
            let child_priority = self.jobs.read().get(&child).map(|j| j.priority);
            if let Some(p) = child_priority {
                let _ = self.priority_queue.enqueue(child, p);
            }
        }

        if let Some(key) = unique_key {
            self.uniqueness.release(&key, id);
        }

        let duration = started_at
            .and_then(|s| (Utc::now() - s).to_std().ok())
            .unwrap_or_default();
        JobMetrics::completed(&name, priority_label(priority), duration);
    }

    async fn complete_failure(&self, worker_id: &str, id: &JobId, error: TaskQueueError) {
        let preimage = {
            let jobs = self.jobs.read();
            let Some(job) = jobs.get(id) else {
                return;
            };
            (
                job.retry_config.clone(),
                job.attempt,
                job.name.clone(),
                job.priority,
                job.started_at,
            )
        };
        let (retry_config, attempt, name, priority, started_at) = preimage;

        {
            let mut jobs = self.jobs.write();
            if let Some(job) = jobs.get_mut(id) {
                let _ = job.transition(JobStatus::Failed);
                job.last_error = Some(error.to_string());
            }
        }

        self.workers.complete(worker_id, id, false);

        let decision = RetryEngine::evaluate(&retry_config, attempt, &error);

        if decision.retry {
            {
                let mut jobs = self.jobs.write();
                if let Some(job) = jobs.get_mut(id) {
                    let _ = job.transition(JobStatus::Retrying);
                    job.attempt += 1;
                }
            }
            let run_at = Utc::now() + ChronoDuration::milliseconds(decision.delay_ms as i64);
            self.retry_wheel.schedule(id.clone(), run_at);

            JobMetrics::retried(&name, attempt + 1);
            self.hooks.emit(JobEvent::Retry {
                job_id: id.to_string(),
                job_name: name.clone(),
                attempt: attempt + 1,
                delay_ms: decision.delay_ms,
            });
        } else {
            let unique_key = {
                let mut jobs = self.jobs.write();
                let key = jobs.get(id).and_then(|j| j.unique_key.clone());
                if let Some(job) = jobs.get_mut(id) {
                    let _ = job.transition(JobStatus::Dead);
                }
                key
            };
            self.dlq.lock().push(id.clone());
            if let Some(key) = &unique_key {
                self.uniqueness.release(key, id);
            }
            self.cascade_fail(id);

            JobMetrics::dead_lettered(&name, &decision.reason);
            self.hooks.emit(JobEvent::Dlq {
                job_id: id.to_string(),
                job_name: name.clone(),
                reason: decision.reason.clone(),
            });
            self.alert_sink.emit(
                Severity::Error,
                "job dead-lettered",
                &format!("job {name} exhausted its retries: {}", decision.reason),
                Some(id),
                Some(worker_id),
                serde_json::json!({ "reason": decision.reason }),
            );
        }

        let duration = started_at
            .and_then(|s| (Utc::now() - s).to_std().ok())
            .unwrap_or_default();
        JobMetrics::failed(&name, priority_label(priority), duration);
        self.hooks.emit(JobEvent::Failure {
            job_id: id.to_string(),
            job_name: name,
            reason: error.to_string(),
        });
    }

    /// Propagates FAILED status to every transitive descendant of `id`.
    /// Descendants already in a terminal status are left alone.
    fn cascade_fail(&self, id: &JobId) {
        let mut queue: VecDeque<JobId> = self.graph.mark_failed(id).into_iter().collect();

        while let Some(child) = queue.pop_front() {
            let unique_key = {
                let mut jobs = self.jobs.write();
                let Some(job) = jobs.get_mut(&child) else {
                    continue;
                };
                if job.transition(JobStatus::Failed).is_err() {
                    continue;
                }
                job.unique_key.clone()
            };

            if let Some(key) = unique_key {
                self.uniqueness.release(&key, &child);
            }
            queue.extend(self.graph.mark_failed(&child));
        }
    }
}

#[async_trait]
impl JobSource for Coordinator {
    async fn get_next_job(&self, worker_id: &str, timeout: Option<Duration>) -> Option<Job> {
        let (_, id) = self.next_ready(timeout).await?;

        if let Err(err) = self.workers.assign(worker_id, id.clone()) {
            warn!(job_id = %id, worker_id, error = %err, "could not assign job to worker, re-enqueueing");
            let priority = self.jobs.read().get(&id).map(|j| j.priority).unwrap_or_default();
            let _ = self.priority_queue.enqueue(id, priority);
            return None;
        }

        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id)?;
        if job.transition(JobStatus::Running).is_err() {
            return None;
        }
        job.worker_id = Some(worker_id.to_string());
        info!(job_id = %id, job_name = %job.name, worker_id, "job dispatched");
        Some(job.clone())
    }

    async fn complete_job(&self, worker_id: &str, id: &JobId, result: Result<Value, TaskQueueError>) {
        match result {
            Ok(_) => self.complete_success(worker_id, id).await,
            Err(err) => self.complete_failure(worker_id, id, err).await,
        }
    }

    async fn reclaim(&self, worker_id: &str, id: &JobId) {
        self.workers.complete(worker_id, id, false);
        if self.reassign_job_to_pending(id) {
            warn!(job_id = %id, worker_id, "reclaimed in-flight job after shutdown grace period");
        }
    }
}

#[async_trait]
impl HealthCheck for Coordinator {
    fn name(&self) -> &str {
        "forgequeue-coordinator"
    }

    /// Unhealthy once the DLQ is full (jobs can no longer be dead-lettered
    /// without eviction); degraded once it's most of the way there, or once
    /// every registered worker has dropped out of ACTIVE status.
    async fn check(&self) -> HealthStatus {
        let dlq_depth = self.dlq.lock().len();
        let dlq_max = self.config.queue.dlq.max_size;
        let active_workers = self.workers.active_count();
        let registered_workers = self.workers.all().len();

        if dlq_max > 0 && dlq_depth >= dlq_max {
            return HealthStatus::Unhealthy(format!(
                "dead-letter queue at capacity ({dlq_depth}/{dlq_max})"
            ));
        }

        if registered_workers > 0 && active_workers == 0 {
            return HealthStatus::Unhealthy(format!(
                "no active workers out of {registered_workers} registered"
            ));
        }

        if dlq_max > 0 && dlq_depth * 10 >= dlq_max * 8 {
            return HealthStatus::Degraded(format!(
                "dead-letter queue nearing capacity ({dlq_depth}/{dlq_max})"
            ));
        }

        HealthStatus::Healthy
    }
}
