//! Job data model: identity, priority, status, and transitions.

use crate::error::TaskQueueError;
use crate::retry::RetryConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Unique job identifier (128 bits of entropy, UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job priority. Lower numeric value means more urgent; the discriminant
/// doubles as the level index into the priority queue's per-level storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i8)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    Batch = 4,
}

impl Priority {
    /// All priority levels, ordered from most to least urgent.
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Batch,
    ];

    /// Returns the zero-based level index used for queue storage and scoring.
    pub fn level(self) -> usize {
        self as i8 as usize
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Job status. Transitions are enforced by [`Job::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Retrying,
    Dead,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
            JobStatus::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

impl JobStatus {
    /// Returns true if this is a terminal status (no further transitions, and
    /// any held uniqueness key should be released).
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Dead)
    }

    fn allows(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Scheduled)
                | (Pending, Running)
                | (Pending, Failed)
                | (Scheduled, Pending)
                | (Scheduled, Failed)
                | (Running, Completed)
                | (Running, Failed)
                // Worker heartbeat expiry: the leader reassigns the job.
                | (Running, Pending)
                | (Failed, Retrying)
                | (Failed, Dead)
                | (Retrying, Pending)
                // Operator-initiated DLQ recovery.
                | (Dead, Pending)
        )
    }
}

/// A task queue job: immutable identity plus mutable execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub payload: Value,
    pub priority: Priority,
    pub status: JobStatus,

    pub delay_ms: u64,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub cron_expression: Option<String>,
    pub timezone: String,

    /// Ordered set of job ids this job depends on.
    pub depends_on: Vec<JobId>,

    pub retry_config: RetryConfig,
    pub attempt: u32,
    pub unique_key: Option<String>,

    /// Per-job execution deadline. `None` means the worker's default applies.
    pub timeout_ms: Option<u64>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub worker_id: Option<String>,
    pub last_error: Option<String>,
}

impl Job {
    /// Builds a new PENDING job with the given name and payload. Use the
    /// builder-style setters before submitting it to the coordinator.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            name: name.into(),
            payload,
            priority: Priority::Normal,
            status: JobStatus::Pending,
            delay_ms: 0,
            scheduled_at: None,
            cron_expression: None,
            timezone: "UTC".to_string(),
            depends_on: Vec::new(),
            retry_config: RetryConfig::default(),
            attempt: 0,
            unique_key: None,
            timeout_ms: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            worker_id: None,
            last_error: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_cron(mut self, expr: impl Into<String>, timezone: impl Into<String>) -> Self {
        self.cron_expression = Some(expr.into());
        self.timezone = timezone.into();
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<JobId>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn with_unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_key = Some(key.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Creates a fresh job (new id, attempt reset to 0) that inherits this
    /// job's name/payload/priority/retry config. Used by the cron registry
    /// to emit one new occurrence per fire.
    pub fn spawn_occurrence(&self) -> Self {
        Job::new(self.name.clone(), self.payload.clone())
            .with_priority(self.priority)
            .with_retry_config(self.retry_config.clone())
    }

    /// Validates the job against the data-model invariants in §3: a CUSTOM
    /// retry strategy needs a non-empty delay table, delays must be
    /// non-negative (enforced by the `u64` types), and `max_attempts` must be
    /// at least 1.
    pub fn validate(&self) -> Result<(), TaskQueueError> {
        if self.name.trim().is_empty() {
            return Err(TaskQueueError::ValidationError(
                "job name must not be empty".to_string(),
            ));
        }
        self.retry_config.validate()?;
        if self.attempt > self.retry_config.max_attempts {
            return Err(TaskQueueError::ValidationError(format!(
                "attempt {} exceeds max_attempts {}",
                self.attempt, self.retry_config.max_attempts
            )));
        }
        Ok(())
    }

    /// Applies a status transition through the single authoritative function
    /// required by §4.1; illegal transitions are rejected rather than applied.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), TaskQueueError> {
        if !self.status.allows(next) {
            return Err(TaskQueueError::illegal_state(
                self.id.as_str(),
                self.status.to_string(),
                next.to_string(),
            ));
        }

        match next {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            JobStatus::Completed | JobStatus::Dead => self.completed_at = Some(Utc::now()),
            _ => {}
        }

        self.status = next;
        Ok(())
    }

    /// Returns true if this job declares dependencies. The coordinator, not
    /// this struct, decides whether they are currently unmet.
    pub fn has_dependencies(&self) -> bool {
        !self.depends_on.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_id_generation_is_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn priority_levels_are_ordered_by_urgency() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert_eq!(Priority::Critical.level(), 0);
        assert_eq!(Priority::Batch.level(), 4);
    }

    #[test]
    fn legal_transitions_succeed() {
        let mut job = Job::new("send_email", json!({}));
        assert_eq!(job.status, JobStatus::Pending);
        job.transition(JobStatus::Running).unwrap();
        assert!(job.started_at.is_some());
        job.transition(JobStatus::Completed).unwrap();
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut job = Job::new("send_email", json!({}));
        let err = job.transition(JobStatus::Completed).unwrap_err();
        assert!(matches!(err, TaskQueueError::IllegalState { .. }));
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn retry_then_pending_then_running_is_legal() {
        let mut job = Job::new("send_email", json!({}));
        job.transition(JobStatus::Running).unwrap();
        job.transition(JobStatus::Failed).unwrap();
        job.transition(JobStatus::Retrying).unwrap();
        job.transition(JobStatus::Pending).unwrap();
        job.transition(JobStatus::Running).unwrap();
    }

    #[test]
    fn validate_rejects_attempt_past_max() {
        let mut job = Job::new("x", json!({})).with_retry_config(RetryConfig::fixed(1, 100));
        job.attempt = 5;
        assert!(job.validate().is_err());
    }
}
