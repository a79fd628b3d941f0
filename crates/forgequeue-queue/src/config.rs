//! Task queue configuration: Redis persistence seam, worker pool, priority
//! weights, work stealing, and scheduler/leader-election sections.

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the task queue engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    /// Redis connection configuration (optional persistence seam only).
    #[serde(default)]
    pub redis: RedisConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Queue/DLQ configuration.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Weighted-fair priority dequeue configuration.
    #[serde(default)]
    pub priority: PriorityConfig,

    /// Work-stealing and leader-election configuration.
    #[serde(default)]
    pub steal: StealConfig,

    /// Cron/delay scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            worker: WorkerConfig::default(),
            queue: QueueConfig::default(),
            priority: PriorityConfig::default(),
            steal: StealConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl TaskQueueConfig {
    /// Loads configuration the layered way: `{config_dir}/default.toml` →
    /// `{config_dir}/{environment}.toml` → `{config_dir}/local.toml` →
    /// `{env_prefix}__`-prefixed environment variables. Every layer is
    /// optional; a missing `config_dir` entirely still produces a runnable
    /// configuration via `#[serde(default)]`.
    pub async fn load_layered(
        config_dir: impl Into<String>,
        env_prefix: impl Into<String>,
    ) -> crate::error::TaskQueueResult<Self> {
        let loader: forgequeue_config::ConfigLoader<Self> =
            forgequeue_config::ConfigLoader::new(config_dir, env_prefix)?;
        Ok(loader.get().await)
    }
}

/// Redis connection configuration for the optional event-store seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Key prefix for all persisted keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "forgequeue".to_string()
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Heartbeat interval; the worker's heartbeat timeout (§4.6) is `3x` this.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Max concurrent jobs a single worker node accepts (for `assign`/steal).
    #[serde(default = "default_max_concurrent_per_worker")]
    pub max_concurrent_per_worker: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            job_timeout_secs: default_job_timeout(),
            poll_interval_ms: default_poll_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            max_concurrent_per_worker: default_max_concurrent_per_worker(),
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
        .max(4)
}

fn default_job_timeout() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    100
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_max_concurrent_per_worker() -> u32 {
    8
}

impl WorkerConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Heartbeat timeout: a worker is stale once `3x` its heartbeat interval
    /// has elapsed with no update, matching the reference default ratio.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs * 3)
    }
}

/// Queue/DLQ/retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub default_retry: RetryConfig,

    #[serde(default)]
    pub dlq: DlqConfig,

    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_retry: RetryConfig::default(),
            dlq: DlqConfig::default(),
            retention_secs: default_retention(),
        }
    }
}

fn default_retention() -> u64 {
    86400 * 7
}

/// Dead letter queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqConfig {
    #[serde(default = "default_dlq_max_size")]
    pub max_size: usize,

    #[serde(default = "default_dlq_retention")]
    pub retention_secs: u64,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_size: default_dlq_max_size(),
            retention_secs: default_dlq_retention(),
        }
    }
}

fn default_dlq_max_size() -> usize {
    10_000
}

fn default_dlq_retention() -> u64 {
    86400 * 30
}

/// Weighted-fair priority dequeue configuration, mirroring
/// `crate::queue::PriorityWeights`'s shape for layered-config loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityConfig {
    #[serde(default = "default_base_weight")]
    pub base_weight: [f64; 5],

    #[serde(default = "default_starvation_boost")]
    pub starvation_boost: f64,

    #[serde(default = "default_boost_interval_ms")]
    pub boost_interval_ms: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            base_weight: default_base_weight(),
            starvation_boost: default_starvation_boost(),
            boost_interval_ms: default_boost_interval_ms(),
        }
    }
}

fn default_base_weight() -> [f64; 5] {
    [1.0, 0.8, 0.5, 0.3, 0.1]
}

fn default_starvation_boost() -> f64 {
    0.1
}

fn default_boost_interval_ms() -> f64 {
    1000.0
}

impl From<&PriorityConfig> for crate::queue::PriorityWeights {
    fn from(config: &PriorityConfig) -> Self {
        Self {
            base_weight: config.base_weight,
            starvation_boost: config.starvation_boost,
            boost_interval_ms: config.boost_interval_ms,
        }
    }
}

/// Work-stealing and leader-election configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StealConfig {
    /// Enable the leader-driven steal protocol.
    #[serde(default = "default_steal_enabled")]
    pub enabled: bool,

    /// Load threshold `τ` distinguishing overloaded/underloaded workers.
    #[serde(default = "default_steal_threshold")]
    pub threshold: f64,

    /// Interval between steal rounds.
    #[serde(default = "default_steal_interval_secs")]
    pub round_interval_secs: u64,

    /// Leader election lock TTL; the holder renews at `ttl / 3`.
    #[serde(default = "default_leader_ttl")]
    pub leader_ttl_secs: u64,
}

impl Default for StealConfig {
    fn default() -> Self {
        Self {
            enabled: default_steal_enabled(),
            threshold: default_steal_threshold(),
            round_interval_secs: default_steal_interval_secs(),
            leader_ttl_secs: default_leader_ttl(),
        }
    }
}

fn default_steal_enabled() -> bool {
    true
}

fn default_steal_threshold() -> f64 {
    0.3
}

fn default_steal_interval_secs() -> u64 {
    5
}

fn default_leader_ttl() -> u64 {
    30
}

impl StealConfig {
    pub fn leader_ttl(&self) -> Duration {
        Duration::from_secs(self.leader_ttl_secs)
    }

    pub fn round_interval(&self) -> Duration {
        Duration::from_secs(self.round_interval_secs)
    }
}

/// Cron/delay scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    /// How often the coordinator drains due delay/retry/cron entries.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_serde() {
        let config = TaskQueueConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: TaskQueueConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.worker.concurrency, config.worker.concurrency);
        assert_eq!(back.steal.threshold, 0.3);
    }

    #[test]
    fn priority_config_converts_to_queue_weights() {
        let config = PriorityConfig::default();
        let weights: crate::queue::PriorityWeights = (&config).into();
        assert_eq!(weights.base_weight, config.base_weight);
    }

    #[tokio::test]
    async fn load_layered_falls_back_to_defaults_with_no_config_dir() {
        let config = TaskQueueConfig::load_layered("./nonexistent-config-dir", "FORGEQUEUE_LOAD_TEST")
            .await
            .unwrap();
        assert_eq!(config.steal.threshold, 0.3);
    }

    #[test]
    fn heartbeat_timeout_is_three_times_interval() {
        let config = WorkerConfig::default();
        assert_eq!(
            config.heartbeat_timeout(),
            Duration::from_secs(config.heartbeat_interval_secs * 3)
        );
    }
}
