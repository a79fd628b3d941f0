//! Multi-level priority queue with weighted fair dequeue.
//!
//! One ordered set per priority level, keyed by `(enqueue_instant, id)` so the
//! head of a level is always its earliest-enqueued job. Dequeue scores every
//! non-empty level and pops from the level with the highest score, which
//! keeps higher priorities favored while guaranteeing lower ones are never
//! starved outright.

use crate::error::{TaskQueueError, TaskQueueResult};
use crate::job::{JobId, Priority};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout as tokio_timeout;

/// Per-level weighting for the weighted fair dequeue formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityWeights {
    /// Base weight per priority level, indexed by [`Priority::level`].
    pub base_weight: [f64; 5],
    /// Starvation boost applied per `boost_interval_ms` of head-of-line wait.
    pub starvation_boost: f64,
    /// Interval, in milliseconds, over which one unit of starvation boost accrues.
    pub boost_interval_ms: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            base_weight: [1.0, 0.8, 0.5, 0.3, 0.1],
            starvation_boost: 0.1,
            boost_interval_ms: 1000.0,
        }
    }
}

impl PriorityWeights {
    fn score(&self, priority: Priority, wait_time_ms: i64) -> f64 {
        let level = priority.level();
        self.base_weight[level]
            + (wait_time_ms as f64 / self.boost_interval_ms) * self.starvation_boost
            - 0.01 * level as f64
    }
}

/// Per-level ordered entries plus a reverse index for O(log n) removal.
#[derive(Default)]
struct Level {
    entries: BTreeSet<(DateTime<Utc>, JobId)>,
    index: HashMap<JobId, DateTime<Utc>>,
}

impl Level {
    fn insert(&mut self, id: JobId, at: DateTime<Utc>) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }
        self.index.insert(id.clone(), at);
        self.entries.insert((at, id));
        true
    }

    fn remove(&mut self, id: &JobId) -> bool {
        if let Some(at) = self.index.remove(id) {
            self.entries.remove(&(at, id.clone()));
            true
        } else {
            false
        }
    }

    fn head(&self) -> Option<&(DateTime<Utc>, JobId)> {
        self.entries.iter().next()
    }

    fn pop_head(&mut self) -> Option<JobId> {
        let head = self.entries.iter().next().cloned();
        if let Some((at, id)) = head {
            self.entries.remove(&(at, id.clone()));
            self.index.remove(&id);
            Some(id)
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Multi-level priority queue. One queue instance typically backs the
/// `PENDING`, ready-to-run jobs of a single coordinator.
pub struct PriorityQueue {
    levels: Mutex<[Level; 5]>,
    weights: PriorityWeights,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new(weights: PriorityWeights) -> Self {
        Self {
            levels: Mutex::new(Default::default()),
            weights,
            notify: Notify::new(),
        }
    }

    /// Enqueues a job at the given priority. Rejects if the id is already
    /// present anywhere in the queue. Wakes every waiter (broadcast, not
    /// single-permit) so no wakeup is dropped under concurrent producers.
    pub fn enqueue(&self, id: JobId, priority: Priority) -> TaskQueueResult<()> {
        let inserted = {
            let mut levels = self.levels.lock();
            levels[priority.level()].insert(id.clone(), Utc::now())
        };

        if !inserted {
            return Err(TaskQueueError::ValidationError(format!(
                "job {id} already present in priority queue"
            )));
        }

        self.notify.notify_waiters();
        Ok(())
    }

    /// Attempts one weighted-fair dequeue without blocking.
    pub fn try_dequeue(&self) -> Option<(Priority, JobId)> {
        let mut levels = self.levels.lock();
        let now = Utc::now();

        let mut best: Option<(f64, Priority)> = None;
        for priority in Priority::ALL {
            let level = &levels[priority.level()];
            let Some((at, _)) = level.head() else {
                continue;
            };
            let wait_ms = (now - *at).num_milliseconds().max(0);
            let score = self.weights.score(priority, wait_ms);
            let better = match best {
                None => true,
                Some((best_score, best_priority)) => {
                    score > best_score || (score == best_score && priority < best_priority)
                }
            };
            if better {
                best = Some((score, priority));
            }
        }

        let (_, priority) = best?;
        let id = levels[priority.level()].pop_head()?;
        Some((priority, id))
    }

    /// Blocks until a job is available or `timeout` elapses. `None` means the
    /// timeout elapsed with no job available; this never errors for empty
    /// state.
    pub async fn dequeue(&self, timeout_duration: Option<Duration>) -> Option<(Priority, JobId)> {
        loop {
            if let Some(item) = self.try_dequeue() {
                return Some(item);
            }

            let wait = self.notify.notified();
            match timeout_duration {
                Some(d) => {
                    if tokio_timeout(d, wait).await.is_err() {
                        return self.try_dequeue();
                    }
                }
                None => wait.await,
            }
        }
    }

    /// Removes a job from the queue regardless of level. Returns true if it
    /// was present.
    pub fn remove(&self, id: &JobId) -> bool {
        let mut levels = self.levels.lock();
        levels.iter_mut().any(|level| level.remove(id))
    }

    /// Moves a job to a new priority level, preserving its original enqueue
    /// instant so FIFO ordering within the new level still reflects when the
    /// job first became eligible.
    pub fn update_priority(&self, id: &JobId, new_priority: Priority) -> bool {
        let mut levels = self.levels.lock();
        let at = levels
            .iter()
            .find_map(|level| level.index.get(id).copied());
        let Some(at) = at else {
            return false;
        };
        for level in levels.iter_mut() {
            level.remove(id);
        }
        levels[new_priority.level()].insert(id.clone(), at);
        true
    }

    pub fn size(&self) -> usize {
        self.levels.lock().iter().map(Level::len).sum()
    }

    pub fn size_by_priority(&self) -> [usize; 5] {
        let levels = self.levels.lock();
        let mut sizes = [0usize; 5];
        for (i, level) in levels.iter().enumerate() {
            sizes[i] = level.len();
        }
        sizes
    }

    pub fn peek(&self) -> Option<(Priority, JobId)> {
        let levels = self.levels.lock();
        for priority in Priority::ALL {
            if let Some((_, id)) = levels[priority.level()].head() {
                return Some((priority, id.clone()));
            }
        }
        None
    }

    pub fn clear(&self) {
        let mut levels = self.levels.lock();
        for level in levels.iter_mut() {
            *level = Level::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_within_a_single_level() {
        let queue = PriorityQueue::new(PriorityWeights::default());
        let a = JobId::new();
        let b = JobId::new();
        queue.enqueue(a.clone(), Priority::Normal).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        queue.enqueue(b.clone(), Priority::Normal).unwrap();

        assert_eq!(queue.try_dequeue().unwrap().1, a);
        assert_eq!(queue.try_dequeue().unwrap().1, b);
    }

    #[test]
    fn duplicate_enqueue_is_rejected() {
        let queue = PriorityQueue::new(PriorityWeights::default());
        let id = JobId::new();
        queue.enqueue(id.clone(), Priority::Normal).unwrap();
        assert!(queue.enqueue(id, Priority::Normal).is_err());
    }

    #[test]
    fn scenario_s1_mixed_priority_ordering() {
        let queue = PriorityQueue::new(PriorityWeights::default());
        let a = JobId::new();
        let b = JobId::new();
        let c = JobId::new();
        queue.enqueue(a.clone(), Priority::Batch).unwrap();
        queue.enqueue(b.clone(), Priority::Critical).unwrap();
        queue.enqueue(c.clone(), Priority::Normal).unwrap();

        assert_eq!(queue.try_dequeue().unwrap().1, b);
        assert_eq!(queue.try_dequeue().unwrap().1, c);
        assert_eq!(queue.try_dequeue().unwrap().1, a);
    }

    #[test]
    fn remove_and_update_priority() {
        let queue = PriorityQueue::new(PriorityWeights::default());
        let id = JobId::new();
        queue.enqueue(id.clone(), Priority::Low).unwrap();
        assert!(queue.update_priority(&id, Priority::Critical));
        assert_eq!(queue.peek().unwrap().0, Priority::Critical);
        assert!(queue.remove(&id));
        assert_eq!(queue.size(), 0);
    }
}
