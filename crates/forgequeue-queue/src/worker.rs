//! Worker pool: concurrency-limited execution of jobs pulled from a job
//! source (the coordinator), dispatched to handlers registered by job name.

use crate::error::TaskQueueError;
use crate::job::{Job, JobId};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Job handler. Implementations perform the actual work; failures are
/// surfaced as a `TaskQueueError` and routed through the retry engine.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<Value, TaskQueueError>;
}

/// The pull side of the coordinator as seen by a worker pool. Implemented by
/// `Coordinator`; kept as a trait so `worker.rs` doesn't need to know the
/// coordinator's internals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn get_next_job(&self, worker_id: &str, timeout: Option<Duration>) -> Option<Job>;
    async fn complete_job(&self, worker_id: &str, id: &JobId, result: Result<Value, TaskQueueError>);

    /// Releases `id` back to PENDING without recording a success/failure
    /// outcome. Called when a worker pool's shutdown grace period elapses
    /// while `id` is still in flight on that worker, so the job isn't stuck
    /// RUNNING forever under a permit that never freed up. No-op by default;
    /// `Coordinator` overrides this with a real reassignment.
    async fn reclaim(&self, _worker_id: &str, _id: &JobId) {}
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent in-flight jobs.
    pub concurrency: usize,
    /// Default job execution timeout, used when a job carries no `timeout_ms`.
    pub default_job_timeout: Duration,
    /// Interval between dequeue polls when no job is immediately available.
    pub poll_interval: Duration,
    /// Grace period for in-flight jobs to finish on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            default_job_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Concurrency-limited pool that pulls jobs from a [`JobSource`] and
/// dispatches them to handlers registered by job name, behind a semaphore
/// bounding in-flight work to `concurrency`.
pub struct WorkerPool<S: JobSource + 'static> {
    id: String,
    source: Arc<S>,
    config: WorkerPoolConfig,
    handlers: Arc<RwLock<HashMap<String, Arc<dyn Handler>>>>,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
    jobs_processed: Arc<AtomicU64>,
    jobs_failed: Arc<AtomicU64>,
    in_flight: Arc<Mutex<HashMap<String, JobId>>>,
}

impl<S: JobSource + 'static> WorkerPool<S> {
    pub fn new(source: Arc<S>, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            id: format!("worker-pool-{}", Uuid::new_v4()),
            source,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            jobs_processed: Arc::new(AtomicU64::new(0)),
            jobs_failed: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers `handler` under `job_name`. A job whose name has no
    /// registered handler fails with `HandlerError` on dequeue.
    pub fn register(&self, job_name: impl Into<String>, handler: Arc<dyn Handler>) {
        let job_name = job_name.into();
        self.handlers.write().insert(job_name.clone(), handler);
        info!(job_name = %job_name, "registered job handler");
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            id: self.id.clone(),
            running: self.is_running(),
            concurrency: self.config.concurrency,
            jobs_processed: self.jobs_processed(),
            jobs_failed: self.jobs_failed(),
        }
    }

    pub fn stop(&self) {
        info!(pool_id = %self.id, "stopping worker pool");
        let _ = self.shutdown_tx.send(());
    }

    /// Runs the dispatch loop until `stop` is called. Each acquired
    /// semaphore permit spawns one dequeue-execute-complete cycle; a slot
    /// that finds no job is released immediately rather than held idle.
    pub async fn start(&self) -> Result<(), TaskQueueError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TaskQueueError::Configuration(
                "worker pool already running".to_string(),
            ));
        }

        info!(pool_id = %self.id, concurrency = self.config.concurrency, "starting worker pool");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(pool_id = %self.id, "received shutdown signal");
                    break;
                }
                permit = semaphore.clone().acquire_owned() => {
                    if let Ok(permit) = permit {
                        let source = self.source.clone();
                        let handlers = self.handlers.clone();
                        let worker_id = format!("{}-{}", self.id, Uuid::new_v4());
                        let default_timeout = self.config.default_job_timeout;
                        let jobs_processed = self.jobs_processed.clone();
                        let jobs_failed = self.jobs_failed.clone();
                        let in_flight = self.in_flight.clone();
                        let poll_interval = self.config.poll_interval;

                        tokio::spawn(
                            async move {
                                run_one(
                                    source,
                                    handlers,
                                    &worker_id,
                                    default_timeout,
                                    &jobs_processed,
                                    &jobs_failed,
                                    &in_flight,
                                )
                                .await;
                                drop(permit);
                            }
                            .instrument(tracing::info_span!("worker")),
                        );

                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        }

        let drained = tokio_timeout(self.config.shutdown_timeout, async {
            while semaphore.available_permits() < self.config.concurrency {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            let stuck: Vec<(String, JobId)> = self.in_flight.lock().drain().collect();
            for (worker_id, job_id) in stuck {
                warn!(
                    pool_id = %self.id,
                    worker_id = %worker_id,
                    job_id = %job_id,
                    "shutdown grace period elapsed with job still in flight, reclaiming"
                );
                self.source.reclaim(&worker_id, &job_id).await;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(
            pool_id = %self.id,
            processed = self.jobs_processed(),
            failed = self.jobs_failed(),
            "worker pool stopped"
        );

        Ok(())
    }
}

async fn run_one<S: JobSource>(
    source: Arc<S>,
    handlers: Arc<RwLock<HashMap<String, Arc<dyn Handler>>>>,
    worker_id: &str,
    default_timeout: Duration,
    jobs_processed: &AtomicU64,
    jobs_failed: &AtomicU64,
    in_flight: &Mutex<HashMap<String, JobId>>,
) {
    let Some(job) = source.get_next_job(worker_id, Some(Duration::from_millis(50))).await else {
        return;
    };

    let job_id = job.id.clone();
    in_flight.lock().insert(worker_id.to_string(), job_id.clone());

    debug!(job_id = %job_id, job_name = %job.name, worker_id, "processing job");

    let handler = handlers.read().get(&job.name).cloned();
    let Some(handler) = handler else {
        let err = TaskQueueError::HandlerError(format!("no handler registered for {}", job.name));
        error!(job_id = %job_id, job_name = %job.name, "no handler registered");
        source.complete_job(worker_id, &job_id, Err(err)).await;
        jobs_failed.fetch_add(1, Ordering::Relaxed);
        in_flight.lock().remove(worker_id);
        return;
    };

    let deadline = job
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(default_timeout);

    let outcome = tokio_timeout(deadline, handler.handle(&job)).await;

    let result = match outcome {
        Ok(Ok(value)) => {
            jobs_processed.fetch_add(1, Ordering::Relaxed);
            Ok(value)
        }
        Ok(Err(err)) => {
            warn!(job_id = %job_id, error = %err, "job execution failed");
            jobs_failed.fetch_add(1, Ordering::Relaxed);
            Err(err)
        }
        Err(_) => {
            let err = TaskQueueError::TimeoutError {
                job_id: job_id.to_string(),
                timeout_ms: deadline.as_millis() as u64,
            };
            warn!(job_id = %job_id, "job timed out");
            jobs_failed.fetch_add(1, Ordering::Relaxed);
            Err(err)
        }
    };

    source.complete_job(worker_id, &job_id, result).await;
    in_flight.lock().remove(worker_id);
}

/// Worker pool statistics snapshot.
#[derive(Debug, Clone)]
pub struct WorkerPoolStats {
    pub id: String,
    pub running: bool,
    pub concurrency: usize,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.concurrency, 4);
    }

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn handle(&self, job: &Job) -> Result<Value, TaskQueueError> {
            Ok(job.payload.clone())
        }
    }

    struct SingleJobSource {
        job: StdMutex<Option<Job>>,
        completed: StdMutex<Vec<(JobId, bool)>>,
    }

    #[async_trait]
    impl JobSource for SingleJobSource {
        async fn get_next_job(&self, _worker_id: &str, _timeout: Option<Duration>) -> Option<Job> {
            self.job.lock().unwrap().take()
        }

        async fn complete_job(
            &self,
            _worker_id: &str,
            id: &JobId,
            result: Result<Value, TaskQueueError>,
        ) {
            self.completed.lock().unwrap().push((id.clone(), result.is_ok()));
        }
    }

    #[tokio::test]
    async fn run_one_dispatches_to_registered_handler() {
        let job = Job::new("echo", json!({"hello": "world"}));
        let job_id = job.id.clone();
        let source = Arc::new(SingleJobSource {
            job: StdMutex::new(Some(job)),
            completed: StdMutex::new(Vec::new()),
        });

        let mut handlers = HashMap::new();
        handlers.insert("echo".to_string(), Arc::new(EchoHandler) as Arc<dyn Handler>);
        let handlers = Arc::new(RwLock::new(handlers));

        let processed = AtomicU64::new(0);
        let failed = AtomicU64::new(0);
        let in_flight = Mutex::new(HashMap::new());

        run_one(
            source.clone(),
            handlers,
            "worker-1",
            Duration::from_secs(1),
            &processed,
            &failed,
            &in_flight,
        )
        .await;

        assert_eq!(processed.load(Ordering::Relaxed), 1);
        assert_eq!(source.completed.lock().unwrap(), vec![(job_id, true)]);
        assert!(in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn run_one_fails_when_no_handler_registered() {
        let job = Job::new("unknown_type", json!({}));
        let job_id = job.id.clone();
        let source = Arc::new(SingleJobSource {
            job: StdMutex::new(Some(job)),
            completed: StdMutex::new(Vec::new()),
        });
        let handlers = Arc::new(RwLock::new(HashMap::new()));
        let processed = AtomicU64::new(0);
        let failed = AtomicU64::new(0);
        let in_flight = Mutex::new(HashMap::new());

        run_one(
            source.clone(),
            handlers,
            "worker-1",
            Duration::from_secs(1),
            &processed,
            &failed,
            &in_flight,
        )
        .await;

        assert_eq!(failed.load(Ordering::Relaxed), 1);
        assert_eq!(source.completed.lock().unwrap(), vec![(job_id, false)]);
        assert!(in_flight.lock().is_empty());
    }

    struct StuckHandler;

    #[async_trait]
    impl Handler for StuckHandler {
        async fn handle(&self, _job: &Job) -> Result<Value, TaskQueueError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    struct OneShotJobSource {
        job: StdMutex<Option<Job>>,
        reclaimed: StdMutex<Vec<(String, JobId)>>,
    }

    #[async_trait]
    impl JobSource for OneShotJobSource {
        async fn get_next_job(&self, _worker_id: &str, _timeout: Option<Duration>) -> Option<Job> {
            self.job.lock().unwrap().take()
        }

        async fn complete_job(&self, _worker_id: &str, _id: &JobId, _result: Result<Value, TaskQueueError>) {}

        async fn reclaim(&self, worker_id: &str, id: &JobId) {
            self.reclaimed.lock().unwrap().push((worker_id.to_string(), id.clone()));
        }
    }

    #[tokio::test]
    async fn stop_reclaims_jobs_still_in_flight_after_the_drain_grace_period() {
        let job = Job::new("stuck", json!({}));
        let job_id = job.id.clone();
        let source = Arc::new(OneShotJobSource {
            job: StdMutex::new(Some(job)),
            reclaimed: StdMutex::new(Vec::new()),
        });

        let pool = WorkerPool::new(
            source.clone(),
            WorkerPoolConfig {
                concurrency: 1,
                default_job_timeout: Duration::from_secs(60),
                poll_interval: Duration::from_millis(10),
                shutdown_timeout: Duration::from_millis(50),
            },
        );
        pool.register("stuck", Arc::new(StuckHandler));

        let pool = Arc::new(pool);
        let runner = pool.clone();
        let handle = tokio::spawn(async move { runner.start().await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.stop();
        handle.await.unwrap().unwrap();

        let reclaimed = source.reclaimed.lock().unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].1, job_id);
    }

    #[tokio::test]
    async fn run_one_calls_complete_job_with_ok_on_a_mocked_source() {
        let job = Job::new("echo", json!({"hello": "mock"}));
        let expected_id = job.id.clone();

        let mut source = MockJobSource::new();
        let mut job_slot = Some(job);
        source
            .expect_get_next_job()
            .times(1)
            .returning(move |_, _| job_slot.take());
        source
            .expect_complete_job()
            .withf(move |_worker_id, id, result| *id == expected_id && result.is_ok())
            .times(1)
            .returning(|_, _, _| ());

        let mut handlers = HashMap::new();
        handlers.insert("echo".to_string(), Arc::new(EchoHandler) as Arc<dyn Handler>);
        let handlers = Arc::new(RwLock::new(handlers));

        let processed = AtomicU64::new(0);
        let failed = AtomicU64::new(0);
        let in_flight = Mutex::new(HashMap::new());

        run_one(
            Arc::new(source),
            handlers,
            "worker-1",
            Duration::from_secs(1),
            &processed,
            &failed,
            &in_flight,
        )
        .await;

        assert_eq!(processed.load(Ordering::Relaxed), 1);
        assert!(in_flight.lock().is_empty());
    }
}
