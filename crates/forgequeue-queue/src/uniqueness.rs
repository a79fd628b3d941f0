//! Uniqueness registry: dedups concurrent submissions sharing a `unique_key`.

use crate::error::TaskQueueError;
use crate::job::JobId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Tracks which job currently holds each `unique_key`. A key is held for the
/// lifetime of the non-terminal job that claimed it; releasing happens when
/// the job reaches a terminal status.
#[derive(Default)]
pub struct UniquenessRegistry {
    held: Mutex<HashMap<String, JobId>>,
}

impl UniquenessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key` for `id`. Fails with `DuplicateUnique` if another job
    /// already holds it.
    pub fn acquire(&self, key: &str, id: &JobId) -> Result<(), TaskQueueError> {
        let mut held = self.held.lock();
        match held.get(key) {
            Some(holder) if holder != id => {
                Err(TaskQueueError::DuplicateUnique(key.to_string()))
            }
            _ => {
                held.insert(key.to_string(), id.clone());
                Ok(())
            }
        }
    }

    /// Releases `key` iff `id` is still its holder. No-op otherwise (e.g. a
    /// stale release after the key was already reassigned).
    pub fn release(&self, key: &str, id: &JobId) {
        let mut held = self.held.lock();
        if held.get(key) == Some(id) {
            held.remove(key);
        }
    }

    pub fn holder(&self, key: &str) -> Option<JobId> {
        self.held.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_of_same_key_by_different_job_fails() {
        let registry = UniquenessRegistry::new();
        let a = JobId::new();
        let b = JobId::new();
        registry.acquire("daily-report", &a).unwrap();
        assert!(registry.acquire("daily-report", &b).is_err());
    }

    #[test]
    fn release_frees_the_key_for_reuse() {
        let registry = UniquenessRegistry::new();
        let a = JobId::new();
        let b = JobId::new();
        registry.acquire("daily-report", &a).unwrap();
        registry.release("daily-report", &a);
        assert!(registry.acquire("daily-report", &b).is_ok());
    }

    #[test]
    fn stale_release_does_not_evict_new_holder() {
        let registry = UniquenessRegistry::new();
        let a = JobId::new();
        let b = JobId::new();
        registry.acquire("k", &a).unwrap();
        registry.release("k", &a);
        registry.acquire("k", &b).unwrap();
        registry.release("k", &a);
        assert_eq!(registry.holder("k"), Some(b));
    }
}
