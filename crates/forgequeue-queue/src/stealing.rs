//! Distributed lock, leader election, and load-classification primitives
//! backing work stealing. Steal-round orchestration itself lives in the
//! coordinator, which owns worker and job state; this module only holds the
//! primitives that don't need that state.

use crate::error::{TaskQueueError, TaskQueueResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use forgequeue_core::CoreError;
use forgequeue_resilience::{with_timeout, CircuitBreaker, CircuitBreakerError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// A keyed lock with `(owner, expiry)` semantics. `acquire` succeeds
/// atomically iff the key is absent or expired; `release`/`extend` succeed
/// iff `owner` currently holds it. Implementations must be linearizable.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> TaskQueueResult<bool>;
    async fn release(&self, key: &str, owner: &str) -> TaskQueueResult<bool>;
    async fn extend(&self, key: &str, owner: &str, ttl: Duration) -> TaskQueueResult<bool>;
}

struct LockEntry {
    owner: String,
    expires_at: DateTime<Utc>,
}

/// Single-process reference lock backed by one mutex. Linearizable by
/// construction since every operation takes the same lock.
#[derive(Default)]
pub struct InMemoryLock {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> TaskQueueResult<bool> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let expired = entries
            .get(key)
            .map(|e| e.expires_at <= now)
            .unwrap_or(true);

        if expired {
            entries.insert(
                key.to_string(),
                LockEntry {
                    owner: owner.to_string(),
                    expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
                },
            );
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release(&self, key: &str, owner: &str) -> TaskQueueResult<bool> {
        let mut entries = self.entries.lock();
        if entries.get(key).map(|e| e.owner.as_str()) == Some(owner) {
            entries.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn extend(&self, key: &str, owner: &str, ttl: Duration) -> TaskQueueResult<bool> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            if entry.owner == owner {
                entry.expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Redis calls time out after this long regardless of circuit state.
const REDIS_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Cross-process reference lock: Redis `SET key owner NX PX ttl` for
/// acquire, a Lua compare-and-del for release, a Lua compare-and-pexpire for
/// extend. Mirrors the reference crate's scheduler leader-election pattern.
/// Every call is wrapped in a timeout and circuit breaker, per
/// `forgequeue-resilience`'s contract for external I/O call sites.
pub struct RedisLock {
    pool: Pool,
    breaker: CircuitBreaker,
}

impl RedisLock {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            breaker: CircuitBreaker::with_defaults("redis-lock"),
        }
    }

    /// Runs `f` behind a timeout and the lock's circuit breaker, translating
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

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

#[async_trait]
impl DistributedLock for RedisLock {
    async fn acquire(&self, key: &str, owner: &str, ttl: Duration) -> TaskQueueResult<bool> {
        let (key, owner) = (key.to_string(), owner.to_string());
        self.guarded(|| async move {
            let mut conn = self.pool.get().await?;
            let result: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&owner)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as i64)
                .query_async(&mut *conn)
                .await?;
            Ok(result.is_some())
        })
        .await
    }

    async fn release(&self, key: &str, owner: &str) -> TaskQueueResult<bool> {
        let (key, owner) = (key.to_string(), owner.to_string());
        self.guarded(|| async move {
            let mut conn = self.pool.get().await?;
            let result: i32 = redis::Script::new(RELEASE_SCRIPT)
                .key(&key)
                .arg(&owner)
                .invoke_async(&mut *conn)
                .await?;
            Ok(result == 1)
        })
        .await
    }

    async fn extend(&self, key: &str, owner: &str, ttl: Duration) -> TaskQueueResult<bool> {
        let (key, owner) = (key.to_string(), owner.to_string());
        self.guarded(|| async move {
            let mut conn = self.pool.get().await?;
            let result: i32 = redis::Script::new(EXTEND_SCRIPT)
                .key(&key)
                .arg(&owner)
                .arg(ttl.as_millis() as i64)
                .invoke_async(&mut *conn)
                .await?;
            Ok(result == 1)
        })
        .await
    }
}

/// Well-known key every worker contends on to become leader.
pub const LEADER_KEY: &str = "taskqueue:leader";

/// Leader election over a [`DistributedLock`]. The holder renews at
/// `ttl / 3`; callers are expected to call `try_become_leader` on that cadence.
pub struct LeaderElection<L: DistributedLock> {
    lock: L,
    worker_id: String,
    ttl: Duration,
    is_leader: Mutex<bool>,
}

impl<L: DistributedLock> LeaderElection<L> {
    pub fn new(lock: L, worker_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            lock,
            worker_id: worker_id.into(),
            ttl,
            is_leader: Mutex::new(false),
        }
    }

    pub fn renew_interval(&self) -> Duration {
        self.ttl / 3
    }

    pub fn is_leader(&self) -> bool {
        *self.is_leader.lock()
    }

    /// Attempts to become or remain leader. Call this every `renew_interval`.
    pub async fn try_become_leader(&self) -> TaskQueueResult<bool> {
        let acquired = if self.is_leader() {
            self.lock
                .extend(LEADER_KEY, &self.worker_id, self.ttl)
                .await?
        } else {
            self.lock
                .acquire(LEADER_KEY, &self.worker_id, self.ttl)
                .await?
        };
        *self.is_leader.lock() = acquired;
        Ok(acquired)
    }

    pub async fn step_down(&self) -> TaskQueueResult<()> {
        if self.is_leader() {
            self.lock.release(LEADER_KEY, &self.worker_id).await?;
            *self.is_leader.lock() = false;
        }
        Ok(())
    }
}

/// Load classification threshold. Default matches the reference worker
/// model's steal-trigger threshold.
pub const DEFAULT_STEAL_THRESHOLD: f64 = 0.3;

pub fn load(current_jobs: usize, max_concurrent: usize) -> f64 {
    if max_concurrent == 0 {
        return 1.0;
    }
    current_jobs as f64 / max_concurrent as f64
}

pub fn is_overloaded(current_jobs: usize, max_concurrent: usize, threshold: f64) -> bool {
    load(current_jobs, max_concurrent) >= 1.0 - threshold
}

pub fn is_underloaded(current_jobs: usize, max_concurrent: usize, threshold: f64) -> bool {
    load(current_jobs, max_concurrent) <= threshold
}

/// Sorts `(worker_id, load)` pairs by descending load, for picking steal
/// victims in order.
pub fn sort_overloaded_desc(mut workers: Vec<(String, f64)>) -> Vec<(String, f64)> {
    workers.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    workers
}

/// Sorts `(worker_id, load)` pairs by ascending load, for picking steal
/// thieves in order.
pub fn sort_underloaded_asc(mut workers: Vec<(String, f64)>) -> Vec<(String, f64)> {
    workers.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    workers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_lock_is_exclusive_until_released() {
        let lock = InMemoryLock::new();
        assert!(lock.acquire("k", "a", Duration::from_secs(10)).await.unwrap());
        assert!(!lock.acquire("k", "b", Duration::from_secs(10)).await.unwrap());
        assert!(lock.release("k", "a").await.unwrap());
        assert!(lock.acquire("k", "b", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn release_by_non_owner_fails() {
        let lock = InMemoryLock::new();
        lock.acquire("k", "a", Duration::from_secs(10)).await.unwrap();
        assert!(!lock.release("k", "b").await.unwrap());
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let lock = InMemoryLock::new();
        lock.acquire("k", "a", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lock.acquire("k", "b", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn leader_election_elects_exactly_one_and_renews() {
        let lock = InMemoryLock::new();
        let election = LeaderElection::new(lock, "worker-1", Duration::from_secs(30));
        assert!(election.try_become_leader().await.unwrap());
        assert!(election.is_leader());
        // Renewal (extend path) keeps leadership.
        assert!(election.try_become_leader().await.unwrap());
    }

    #[test]
    fn load_classification_matches_thresholds() {
        assert!(is_overloaded(9, 10, 0.3));
        assert!(is_underloaded(2, 10, 0.3));
        assert!(!is_overloaded(5, 10, 0.3));
        assert!(!is_underloaded(5, 10, 0.3));
    }
}
