//! Worker node lifecycle and registry: registration, heartbeats, capacity-
//! checked job assignment, and stale-worker cleanup.

use crate::error::TaskQueueError;
use crate::job::JobId;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default heartbeat timeout, per §4.6.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// A worker node's lifecycle state: `active` accepts new assignments,
/// `draining` finishes in-flight work but accepts none, `stopped` is
/// retained only until the registry forgets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Active,
    Draining,
    Stopped,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerStatus::Active => "active",
            WorkerStatus::Draining => "draining",
            WorkerStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// A worker node: a bounded set of in-flight jobs plus liveness tracking.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub max_concurrent: u32,
    pub registered_at: Instant,
    pub last_heartbeat: Instant,
    current_jobs: HashSet<JobId>,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    status: WorkerStatus,
    is_leader: bool,
}

impl WorkerInfo {
    fn new(id: String, name: String, host: String, port: u16, max_concurrent: u32) -> Self {
        let now = Instant::now();
        Self {
            id,
            name,
            host,
            port,
            max_concurrent,
            registered_at: now,
            last_heartbeat: now,
            current_jobs: HashSet::new(),
            jobs_processed: 0,
            jobs_failed: 0,
            status: WorkerStatus::Active,
            is_leader: false,
        }
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() < timeout
    }

    pub fn current_job_count(&self) -> usize {
        self.current_jobs.len()
    }

    pub fn current_jobs(&self) -> impl Iterator<Item = &JobId> {
        self.current_jobs.iter()
    }

    pub fn load(&self) -> f64 {
        crate::stealing::load(self.current_job_count(), self.max_concurrent as usize)
    }

    fn heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }
}

/// Registry of all known worker nodes, keyed by id.
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerInfo>>,
    heartbeat_timeout: Duration,
    registration_count: AtomicU64,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_HEARTBEAT_TIMEOUT)
    }

    pub fn with_timeout(heartbeat_timeout: Duration) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            heartbeat_timeout,
            registration_count: AtomicU64::new(0),
        }
    }

    /// Registers a worker, defaulting `name` to the worker id and leaving
    /// `host`/`port` empty. Returns the registration sequence number.
    pub fn register(&self, worker_id: &str, max_concurrent: u32) -> u64 {
        self.register_with_details(worker_id, worker_id, "", 0, max_concurrent)
    }

    /// Registers a worker with its full `WorkerNode` identity. Returns the
    /// registration sequence number.
    pub fn register_with_details(
        &self,
        worker_id: &str,
        name: &str,
        host: &str,
        port: u16,
        max_concurrent: u32,
    ) -> u64 {
        let info = WorkerInfo::new(
            worker_id.to_string(),
            name.to_string(),
            host.to_string(),
            port,
            max_concurrent,
        );
        let seq = self.registration_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.workers.write().insert(worker_id.to_string(), info);

        info!(
            worker_id = %worker_id,
            name,
            host,
            port,
            max_concurrent,
            registration_seq = seq,
            "worker registered"
        );
        seq
    }

    /// Marks `worker_id` as draining: it keeps its in-flight jobs but is no
    /// longer a valid `assign` target, and load classification treats it as
    /// neither overloaded nor underloaded. Returns false if unknown.
    pub fn request_shutdown(&self, worker_id: &str) -> bool {
        if let Some(worker) = self.workers.write().get_mut(worker_id) {
            worker.status = WorkerStatus::Draining;
            info!(worker_id = %worker_id, "worker draining");
            true
        } else {
            false
        }
    }

    /// Marks `worker_id` stopped once its drain has finished. Returns false
    /// if unknown.
    pub fn mark_stopped(&self, worker_id: &str) -> bool {
        if let Some(worker) = self.workers.write().get_mut(worker_id) {
            worker.status = WorkerStatus::Stopped;
            info!(worker_id = %worker_id, "worker stopped");
            true
        } else {
            false
        }
    }

    /// Records whether `worker_id` currently holds leadership, as observed by
    /// whoever polls `LeaderElection`. Returns false if unknown.
    pub fn set_leader(&self, worker_id: &str, is_leader: bool) -> bool {
        if let Some(worker) = self.workers.write().get_mut(worker_id) {
            worker.is_leader = is_leader;
            true
        } else {
            false
        }
    }

    /// Assigns `job_id` to `worker_id`. Fails with `AtCapacity` if the
    /// worker already holds `max_concurrent` jobs, or `UnknownJob` if the
    /// worker isn't registered.
    pub fn assign(&self, worker_id: &str, job_id: JobId) -> Result<(), TaskQueueError> {
        let mut workers = self.workers.write();
        let worker = workers
            .get_mut(worker_id)
            .ok_or_else(|| TaskQueueError::UnknownJob(worker_id.to_string()))?;

        if worker.status != WorkerStatus::Active {
            return Err(TaskQueueError::AtCapacity(worker_id.to_string()));
        }
        if worker.current_jobs.len() >= worker.max_concurrent as usize {
            return Err(TaskQueueError::AtCapacity(worker_id.to_string()));
        }
        worker.current_jobs.insert(job_id);
        Ok(())
    }

    /// Moves `job_id` from `from_id`'s in-flight set to `to_id`'s, respecting
    /// `to_id`'s capacity and leaving processed/failed counters untouched.
    /// Used by work stealing to transfer a job that hasn't started running.
    pub fn reassign(&self, from_id: &str, to_id: &str, job_id: &JobId) -> Result<(), TaskQueueError> {
        let mut workers = self.workers.write();
        {
            let to = workers
                .get(to_id)
                .ok_or_else(|| TaskQueueError::UnknownJob(to_id.to_string()))?;
            if to.status != WorkerStatus::Active || to.current_jobs.len() >= to.max_concurrent as usize
            {
                return Err(TaskQueueError::AtCapacity(to_id.to_string()));
            }
        }
        if let Some(from) = workers.get_mut(from_id) {
            from.current_jobs.remove(job_id);
        }
        if let Some(to) = workers.get_mut(to_id) {
            to.current_jobs.insert(job_id.clone());
        }
        Ok(())
    }

    /// Removes `job_id` from `worker_id`'s in-flight set and records the
    /// outcome. No-op (not an error) if the worker or job is unknown, since
    /// this is also called during worker-death reassignment cleanup.
    pub fn complete(&self, worker_id: &str, job_id: &JobId, success: bool) {
        if let Some(worker) = self.workers.write().get_mut(worker_id) {
            worker.current_jobs.remove(job_id);
            if success {
                worker.jobs_processed += 1;
            } else {
                worker.jobs_failed += 1;
            }
        }
    }

    pub fn heartbeat(&self, worker_id: &str) -> bool {
        let mut workers = self.workers.write();
        if let Some(worker) = workers.get_mut(worker_id) {
            worker.heartbeat();
            debug!(worker_id = %worker_id, "worker heartbeat received");
            true
        } else {
            warn!(worker_id = %worker_id, "heartbeat from unknown worker");
            false
        }
    }

    pub fn unregister(&self, worker_id: &str) -> Option<WorkerInfo> {
        let removed = self.workers.write().remove(worker_id);
        if removed.is_some() {
            info!(worker_id = %worker_id, "worker unregistered");
        }
        removed
    }

    /// Workers whose heartbeat is within the timeout.
    pub fn active(&self) -> Vec<WorkerInfo> {
        let timeout = self.heartbeat_timeout;
        self.workers
            .read()
            .values()
            .filter(|w| w.is_alive(timeout))
            .cloned()
            .collect()
    }

    /// Workers whose heartbeat has expired: complement of [`Self::active`].
    /// The leader reassigns each job these workers hold.
    pub fn stale(&self) -> Vec<WorkerInfo> {
        let timeout = self.heartbeat_timeout;
        self.workers
            .read()
            .values()
            .filter(|w| !w.is_alive(timeout))
            .cloned()
            .collect()
    }

    /// Removes every stale worker from the registry and returns them, so the
    /// caller can reassign their in-flight jobs before they're forgotten.
    pub fn evict_stale(&self) -> Vec<WorkerInfo> {
        let mut workers = self.workers.write();
        let timeout = self.heartbeat_timeout;

        let stale_ids: Vec<String> = workers
            .iter()
            .filter(|(_, w)| !w.is_alive(timeout))
            .map(|(id, _)| id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale_ids.len());
        for id in stale_ids {
            if let Some(worker) = workers.remove(&id) {
                warn!(worker_id = %id, "evicted stale worker");
                evicted.push(worker);
            }
        }
        evicted
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.workers.read().get(worker_id).cloned()
    }

    pub fn all(&self) -> Vec<WorkerInfo> {
        self.workers.read().values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_and_liveness() {
        let registry = WorkerRegistry::new();
        registry.register("worker-1", 4);
        registry.register("worker-2", 2);
        assert_eq!(registry.active_count(), 2);
        assert!(registry.get("worker-3").is_none());
    }

    #[test]
    fn assign_respects_capacity() {
        let registry = WorkerRegistry::new();
        registry.register("worker-1", 1);
        registry.assign("worker-1", JobId::new()).unwrap();
        let err = registry.assign("worker-1", JobId::new()).unwrap_err();
        assert!(matches!(err, TaskQueueError::AtCapacity(_)));
    }

    #[test]
    fn complete_frees_capacity() {
        let registry = WorkerRegistry::new();
        registry.register("worker-1", 1);
        let job = JobId::new();
        registry.assign("worker-1", job.clone()).unwrap();
        registry.complete("worker-1", &job, true);
        assert!(registry.assign("worker-1", JobId::new()).is_ok());
        assert_eq!(registry.get("worker-1").unwrap().jobs_processed, 1);
    }

    #[test]
    fn stale_workers_are_evicted_and_reported() {
        let registry = WorkerRegistry::with_timeout(Duration::from_millis(10));
        registry.register("worker-1", 4);
        std::thread::sleep(Duration::from_millis(20));
        assert!(registry.stale().iter().any(|w| w.id == "worker-1"));

        let evicted = registry.evict_stale();
        assert_eq!(evicted.len(), 1);
        assert!(registry.get("worker-1").is_none());
    }

    #[test]
    fn heartbeat_on_unknown_worker_fails() {
        let registry = WorkerRegistry::new();
        assert!(!registry.heartbeat("ghost"));
    }

    #[test]
    fn register_with_details_populates_worker_node_fields() {
        let registry = WorkerRegistry::new();
        registry.register_with_details("worker-1", "ingest-1", "10.0.0.5", 9000, 4);
        let worker = registry.get("worker-1").unwrap();
        assert_eq!(worker.name, "ingest-1");
        assert_eq!(worker.host, "10.0.0.5");
        assert_eq!(worker.port, 9000);
        assert_eq!(worker.status(), WorkerStatus::Active);
        assert!(!worker.is_leader());
    }

    #[test]
    fn draining_worker_rejects_new_assignments() {
        let registry = WorkerRegistry::new();
        registry.register("worker-1", 4);
        assert!(registry.request_shutdown("worker-1"));
        assert_eq!(registry.get("worker-1").unwrap().status(), WorkerStatus::Draining);
        assert!(matches!(
            registry.assign("worker-1", JobId::new()).unwrap_err(),
            TaskQueueError::AtCapacity(_)
        ));
    }

    #[test]
    fn set_leader_is_observable_and_defaults_false() {
        let registry = WorkerRegistry::new();
        registry.register("worker-1", 4);
        assert!(!registry.get("worker-1").unwrap().is_leader());
        assert!(registry.set_leader("worker-1", true));
        assert!(registry.get("worker-1").unwrap().is_leader());
    }

    #[test]
    fn reassign_moves_a_job_between_workers_without_touching_counters() {
        let registry = WorkerRegistry::new();
        registry.register("worker-1", 1);
        registry.register("worker-2", 1);
        let job = JobId::new();
        registry.assign("worker-1", job.clone()).unwrap();

        registry.reassign("worker-1", "worker-2", &job).unwrap();

        assert_eq!(registry.get("worker-1").unwrap().current_job_count(), 0);
        assert_eq!(registry.get("worker-2").unwrap().current_job_count(), 1);
        assert_eq!(registry.get("worker-2").unwrap().jobs_processed, 0);
    }

    #[test]
    fn reassign_fails_if_thief_is_at_capacity() {
        let registry = WorkerRegistry::new();
        registry.register("worker-1", 1);
        registry.register("worker-2", 1);
        registry.assign("worker-2", JobId::new()).unwrap();
        let job = JobId::new();
        registry.assign("worker-1", job.clone()).unwrap();

        assert!(matches!(
            registry.reassign("worker-1", "worker-2", &job).unwrap_err(),
            TaskQueueError::AtCapacity(_)
        ));
        assert_eq!(registry.get("worker-1").unwrap().current_job_count(), 1);
    }
}
