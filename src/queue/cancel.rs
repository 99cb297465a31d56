//! Registry of jobs marked for cancellation.
//!
//! Cancellation is cooperative: marking a job never interrupts its fetch.
//! The dispatcher consults the registry at its checkpoints (before starting
//! a fetch and after it returns) and the progress sink consults it on every
//! report. Guarded by its own small mutex; it is never held across an await.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use super::job::JobId;

#[derive(Debug, Default)]
pub struct CancelRegistry {
    marked: Mutex<HashSet<JobId>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<JobId>> {
        // A panic while holding this lock cannot leave the set half-updated.
        self.marked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark a job; returns false if it was already marked.
    pub fn mark(&self, job_id: &str) -> bool {
        self.lock().insert(job_id.to_string())
    }

    pub fn is_marked(&self, job_id: &str) -> bool {
        self.lock().contains(job_id)
    }

    /// Clear the mark for a job, reporting whether it was set.
    pub fn take(&self, job_id: &str) -> bool {
        self.lock().remove(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
