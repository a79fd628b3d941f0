//! Redis-backed event store: the optional persistence seam. The in-memory
//! core never requires this to function; it exists purely for crash
//! recovery, reusing the reference crate's pool-construction and
//! key-naming conventions.

use crate::config::RedisConfig;
use crate::error::{TaskQueueError, TaskQueueResult};
use crate::job::{Job, JobId, JobStatus};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use forgequeue_core::CoreError;
use forgequeue_resilience::{with_timeout, CircuitBreaker, CircuitBreakerError};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

/// Redis calls time out after this long regardless of circuit state.
const REDIS_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Creates a Redis connection pool and verifies connectivity with a PING.
pub async fn create_pool(config: &RedisConfig) -> TaskQueueResult<Pool> {
    info!("creating redis connection pool for event store");

    let cfg = Config::from_url(&config.url);
    let pool = cfg
        .builder()
        .map_err(|e| TaskQueueError::Configuration(format!("invalid redis config: {e}")))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| TaskQueueError::Configuration(format!("failed to create pool: {e}")))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("redis connection pool created");
    Ok(pool)
}

/// Key builder for all event-store keys, namespaced under one prefix.
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    pub fn status_index(&self, status: JobStatus) -> String {
        format!("{}:status:{}", self.prefix, status)
    }

    pub fn lock(&self, name: &str) -> String {
        format!("{}:lock:{}", self.prefix, name)
    }

    pub fn leader(&self) -> String {
        format!("{}:leader", self.prefix)
    }
}

impl Default for RedisKeys {
    fn default() -> Self {
        Self::new("forgequeue")
    }
}

/// Recovery-oriented persistence seam: save/load/list/delete full job
/// snapshots. Never on the hot path of submit/dequeue/complete.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn save(&self, job: &Job) -> TaskQueueResult<()>;
    async fn load(&self, id: &JobId) -> TaskQueueResult<Option<Job>>;
    async fn list_by_status(
        &self,
        status: JobStatus,
        limit: usize,
        cursor: usize,
    ) -> TaskQueueResult<Vec<Job>>;
    async fn delete(&self, id: &JobId) -> TaskQueueResult<()>;
}

/// Redis-backed `EventStore`: one hash entry under `job:{id}` plus a
/// per-status sorted set (score = submission instant) for `list_by_status`.
/// Every call is wrapped in a timeout and circuit breaker, per
/// `forgequeue-resilience`'s contract for external I/O call sites.
pub struct RedisEventStore {
    pool: Pool,
    keys: RedisKeys,
    breaker: CircuitBreaker,
}

impl RedisEventStore {
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(key_prefix),
            breaker: CircuitBreaker::with_defaults("redis-event-store"),
        }
    }

    /// Runs `f` behind a timeout and the store's circuit breaker, translating
    /// both failure modes back into `TaskQueueError`.
    async fn guarded<T, F, Fut>(&self, f: F) -> TaskQueueResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = TaskQueueResult<T>>,
    {
        self.breaker
            .call(|| async {
                with_timeout(REDIS_CALL_TIMEOUT, || async {
                    f().await.map_err(|err| CoreError::Internal(err.to_string()))
                })
                .await
            })
            .await
            .map_err(|err: CircuitBreakerError<CoreError>| match err {
                CircuitBreakerError::Open(name) => {
                    TaskQueueError::LockError(format!("circuit breaker '{name}' is open"))
                }
                CircuitBreakerError::Failure(core_err) => TaskQueueError::from(core_err),
            })
    }
}

#[async_trait]
impl EventStore for RedisEventStore {
    async fn save(&self, job: &Job) -> TaskQueueResult<()> {
        let job = job.clone();
        self.guarded(|| async move {
            let mut conn = self.pool.get().await?;
            let serialized = serde_json::to_string(&job)?;
            let _: () = conn.set(self.keys.job(job.id.as_str()), &serialized).await?;
            let _: () = conn
                .zadd(
                    self.keys.status_index(job.status),
                    job.id.as_str(),
                    job.created_at.timestamp_millis(),
                )
                .await?;
            Ok(())
        })
        .await
    }

    async fn load(&self, id: &JobId) -> TaskQueueResult<Option<Job>> {
        let id = id.clone();
        self.guarded(|| async move {
            let mut conn = self.pool.get().await?;
            let raw: Option<String> = conn.get(self.keys.job(id.as_str())).await?;
            Ok(match raw {
                Some(raw) => Some(serde_json::from_str(&raw)?),
                None => None,
            })
        })
        .await
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
        limit: usize,
        cursor: usize,
    ) -> TaskQueueResult<Vec<Job>> {
        let ids: Vec<String> = self
            .guarded(|| async move {
                let mut conn = self.pool.get().await?;
                let ids: Vec<String> = conn
                    .zrange(
                        self.keys.status_index(status),
                        cursor as isize,
                        (cursor + limit).saturating_sub(1) as isize,
                    )
                    .await?;
                Ok(ids)
            })
            .await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.load(&JobId::from(id)).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn delete(&self, id: &JobId) -> TaskQueueResult<()> {
        let id = id.clone();
        self.guarded(|| async move {
            let mut conn = self.pool.get().await?;
            let _: () = conn.del(self.keys.job(id.as_str())).await?;
            for status in [
                JobStatus::Pending,
                JobStatus::Scheduled,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Retrying,
                JobStatus::Dead,
            ] {
                let _: () = conn.zrem(self.keys.status_index(status), id.as_str()).await?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_builder_namespaces_by_prefix() {
        let keys = RedisKeys::new("test");
        assert_eq!(keys.job("123"), "test:job:123");
        assert_eq!(keys.lock("steal"), "test:lock:steal");
        assert_eq!(keys.leader(), "test:leader");
    }
}
