//! Time scheduler: delay wheel, retry wheel, and cron registry.
//!
//! Three independent structures, each behind its own `parking_lot::Mutex` so a
//! slow cron scan never blocks a delay-wheel insert. All three expose the same
//! shape: `schedule`/`cancel`/`pop_due(now)`.

use crate::error::{TaskQueueError, TaskQueueResult};
use crate::job::{Job, JobId};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::str::FromStr;

/// Min-heap of `(run_at, job_id)`, used identically for both the delay wheel
/// and the retry wheel. Cancellation is a lazy-deletion tombstone set so a
/// cancel doesn't require a heap scan.
struct TimeWheel {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, JobId)>>,
    cancelled: HashSet<JobId>,
}

impl TimeWheel {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
        }
    }

    fn schedule(&mut self, id: JobId, run_at: DateTime<Utc>) {
        self.cancelled.remove(&id);
        self.heap.push(Reverse((run_at, id)));
    }

    fn cancel(&mut self, id: &JobId) -> bool {
        self.cancelled.insert(id.clone())
    }

    fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<JobId> {
        let mut due = Vec::new();
        while let Some(Reverse((run_at, _))) = self.heap.peek() {
            if *run_at > now {
                break;
            }
            let Reverse((_, id)) = self.heap.pop().unwrap();
            if self.cancelled.remove(&id) {
                continue;
            }
            due.push(id);
        }
        due
    }
}

/// Delay wheel: one-shot jobs scheduled for a future instant (`delay_ms` or
/// `scheduled_at`).
pub struct DelayWheel {
    wheel: Mutex<TimeWheel>,
}

impl DelayWheel {
    pub fn new() -> Self {
        Self {
            wheel: Mutex::new(TimeWheel::new()),
        }
    }

    /// Schedules `job` per its `delay_ms`/`scheduled_at` fields and returns
    /// the resolved run time.
    pub fn schedule(&self, job: &Job) -> DateTime<Utc> {
        let run_at = job
            .scheduled_at
            .unwrap_or_else(|| Utc::now() + ChronoDuration::milliseconds(job.delay_ms as i64));
        self.wheel.lock().schedule(job.id.clone(), run_at);
        run_at
    }

    pub fn cancel(&self, id: &JobId) -> bool {
        self.wheel.lock().cancel(id)
    }

    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<JobId> {
        self.wheel.lock().pop_due(now)
    }
}

impl Default for DelayWheel {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry wheel: jobs in `RETRYING` status, keyed by job id (unique at any
/// instant since a job has at most one pending retry).
pub struct RetryWheel {
    wheel: Mutex<TimeWheel>,
}

impl RetryWheel {
    pub fn new() -> Self {
        Self {
            wheel: Mutex::new(TimeWheel::new()),
        }
    }

    pub fn schedule(&self, id: JobId, run_at: DateTime<Utc>) {
        self.wheel.lock().schedule(id, run_at);
    }

    pub fn cancel(&self, id: &JobId) -> bool {
        self.wheel.lock().cancel(id)
    }

    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<JobId> {
        self.wheel.lock().pop_due(now)
    }
}

impl Default for RetryWheel {
    fn default() -> Self {
        Self::new()
    }
}

/// One field of a five-field cron expression: the set of accepted values.
#[derive(Debug, Clone)]
struct FieldSpec(HashSet<u32>);

impl FieldSpec {
    fn parse(field: &str, min: u32, max: u32) -> TaskQueueResult<Self> {
        if field == "*" {
            return Ok(Self((min..=max).collect()));
        }

        let mut values = HashSet::new();
        for part in field.split(',') {
            if let Some((base, step)) = part.split_once('/') {
                let step: u32 = step
                    .parse()
                    .map_err(|_| bad_field(field))?;
                if step == 0 {
                    return Err(bad_field(field));
                }
                let start = if base == "*" {
                    min
                } else {
                    base.parse().map_err(|_| bad_field(field))?
                };
                let mut v = start;
                while v <= max {
                    values.insert(v);
                    v += step;
                }
            } else if let Some((start, end)) = part.split_once('-') {
                let start: u32 = start.parse().map_err(|_| bad_field(field))?;
                let end: u32 = end.parse().map_err(|_| bad_field(field))?;
                if start > end {
                    return Err(bad_field(field));
                }
                values.extend(start..=end);
            } else {
                values.insert(part.parse().map_err(|_| bad_field(field))?);
            }
        }

        if values.iter().any(|v| *v < min || *v > max) {
            return Err(bad_field(field));
        }

        Ok(Self(values))
    }

    fn contains(&self, v: u32) -> bool {
        self.0.contains(&v)
    }
}

fn bad_field(field: &str) -> TaskQueueError {
    TaskQueueError::ValidationError(format!("invalid cron field: {field}"))
}

/// Five-field cron expression: `minute hour day-of-month month day-of-week`.
/// Day-of-week is 0-6 with Sunday = 0, matching the reference grammar.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minute: FieldSpec,
    hour: FieldSpec,
    day_of_month: FieldSpec,
    month: FieldSpec,
    day_of_week: FieldSpec,
}

const MAX_SEARCH_MINUTES: i64 = 366 * 24 * 60;

impl CronSchedule {
    pub fn parse(expr: &str) -> TaskQueueResult<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(TaskQueueError::ValidationError(format!(
                "cron expression must have 5 fields, got {}: {expr}",
                parts.len()
            )));
        }

        Ok(Self {
            minute: FieldSpec::parse(parts[0], 0, 59)?,
            hour: FieldSpec::parse(parts[1], 0, 23)?,
            day_of_month: FieldSpec::parse(parts[2], 1, 31)?,
            month: FieldSpec::parse(parts[3], 1, 12)?,
            day_of_week: FieldSpec::parse(parts[4], 0, 6)?,
        })
    }

    fn matches(&self, local: &chrono::NaiveDateTime) -> bool {
        let weekday = local.weekday().num_days_from_sunday();
        self.minute.contains(local.minute())
            && self.hour.contains(local.hour())
            && self.day_of_month.contains(local.day())
            && self.month.contains(local.month())
            && self.day_of_week.contains(weekday)
    }

    /// Smallest instant strictly after `after`, at minute resolution, that
    /// matches the expression in `tz`. Skipped local times (spring-forward
    /// gaps) are skipped; ambiguous local times (fall-back) fire once at the
    /// earlier occurrence. Bounded at 366 days to guarantee termination.
    pub fn next_fire(&self, after: DateTime<Utc>, tz: Tz) -> TaskQueueResult<DateTime<Utc>> {
        let mut local = after
            .with_timezone(&tz)
            .naive_local()
            .with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .ok_or_else(|| TaskQueueError::Internal("failed to truncate cron instant".into()))?
            + ChronoDuration::minutes(1);

        for _ in 0..MAX_SEARCH_MINUTES {
            if self.matches(&local) {
                match tz.from_local_datetime(&local) {
                    chrono::LocalResult::Single(dt) => return Ok(dt.with_timezone(&Utc)),
                    chrono::LocalResult::Ambiguous(earlier, _) => {
                        return Ok(earlier.with_timezone(&Utc))
                    }
                    chrono::LocalResult::None => {}
                }
            }
            local += ChronoDuration::minutes(1);
        }

        Err(TaskQueueError::Internal(format!(
            "no cron fire time found within {MAX_SEARCH_MINUTES} minutes"
        )))
    }
}

/// One registered recurring job: its template, cron expression, and next
/// scheduled fire time.
struct CronEntry {
    template: Job,
    schedule: CronSchedule,
    tz: Tz,
    next_fire: DateTime<Utc>,
}

/// Cron registry: recurring jobs keyed by their template job id. `pop_due`
/// emits a fresh job occurrence per entry whose `next_fire` has passed, and
/// always advances `next_fire` strictly forward — an entry idle for a long
/// time fires exactly once per `pop_due` call, never a catch-up storm.
pub struct CronRegistry {
    entries: Mutex<HashMap<JobId, CronEntry>>,
}

impl CronRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `job` (which must carry `cron_expression`) and returns the
    /// resolved first fire time.
    pub fn register(&self, job: Job) -> TaskQueueResult<DateTime<Utc>> {
        let expr = job.cron_expression.clone().ok_or_else(|| {
            TaskQueueError::ValidationError("cron job missing cron_expression".to_string())
        })?;
        let tz = Tz::from_str(&job.timezone)
            .map_err(|_| TaskQueueError::ValidationError(format!("unknown timezone: {}", job.timezone)))?;
        let schedule = CronSchedule::parse(&expr)?;
        let next_fire = schedule.next_fire(Utc::now(), tz)?;

        let id = job.id.clone();
        self.entries.lock().insert(
            id,
            CronEntry {
                template: job,
                schedule,
                tz,
                next_fire,
            },
        );
        Ok(next_fire)
    }

    pub fn unregister(&self, id: &JobId) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    /// Emits one fresh job occurrence for every entry due at or before `now`,
    /// advancing each entry's `next_fire` strictly past `now`.
    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<Job> {
        let mut entries = self.entries.lock();
        let mut fired = Vec::new();

        for entry in entries.values_mut() {
            if entry.next_fire > now {
                continue;
            }
            fired.push(entry.template.spawn_occurrence());
            if let Ok(next) = entry.schedule.next_fire(now, entry.tz) {
                entry.next_fire = next;
            } else {
                entry.next_fire = now + ChronoDuration::days(366);
            }
        }

        fired
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CronRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_spec_parses_steps_and_ranges() {
        let spec = FieldSpec::parse("*/15", 0, 59).unwrap();
        assert!(spec.contains(0));
        assert!(spec.contains(45));
        assert!(!spec.contains(10));

        let spec = FieldSpec::parse("1-5", 0, 6).unwrap();
        assert!(spec.contains(3));
        assert!(!spec.contains(6));
    }

    #[test]
    fn cron_schedule_rejects_malformed_expression() {
        assert!(CronSchedule::parse("* * *").is_err());
        assert!(CronSchedule::parse("99 * * * *").is_err());
    }

    #[test]
    fn next_fire_is_strictly_after_and_on_minute_boundary() {
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 12, 3, 30).unwrap();
        let next = schedule.next_fire(after, Tz::UTC).unwrap();
        assert!(next > after);
        assert_eq!(next.minute() % 5, 0);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn delay_wheel_returns_only_due_jobs() {
        let wheel = DelayWheel::new();
        let job = Job::new("x", json!({})).with_delay_ms(0);
        let id = job.id.clone();
        wheel.schedule(&job);
        let due = wheel.pop_due(Utc::now() + ChronoDuration::seconds(1));
        assert_eq!(due, vec![id]);
    }

    #[test]
    fn cancelled_delay_entry_is_not_returned() {
        let wheel = DelayWheel::new();
        let job = Job::new("x", json!({})).with_delay_ms(0);
        let id = job.id.clone();
        wheel.schedule(&job);
        assert!(wheel.cancel(&id));
        let due = wheel.pop_due(Utc::now() + ChronoDuration::seconds(1));
        assert!(due.is_empty());
    }

    #[test]
    fn cron_registry_emits_fresh_occurrence_and_advances() {
        let registry = CronRegistry::new();
        let template = Job::new("heartbeat", json!({})).with_cron("* * * * *", "UTC");
        let template_id = template.id.clone();
        registry.register(template).unwrap();

        let far_future = Utc::now() + ChronoDuration::days(2);
        let fired = registry.pop_due(far_future);

        // Exactly one occurrence is emitted per tick, never a catch-up storm,
        // and it is a fresh job distinct from the registered template.
        assert_eq!(fired.len(), 1);
        assert_ne!(fired[0].id, template_id);
        assert_eq!(fired[0].name, "heartbeat");
    }
}
