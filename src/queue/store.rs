use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cancel::CancelRegistry;
use super::job::{Job, JobId, JobResult, JobStatus, JobView, TransitionError};
use super::progress::ProgressUpdate;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Extract a list of urls from an untyped JSON argument.
///
/// Anything other than an array of strings is rejected; blank entries are
/// kept here and skipped by [`JobStore::enqueue`].
pub fn parse_url_list(value: &Value) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| QueueError::InvalidInput("urls must be a list of strings".to_string()))?;

    items
        .iter()
        .map(|item| match item {
            Value::String(url) => Ok(url.clone()),
            Value::Null => Ok(String::new()),
            _ => Err(QueueError::InvalidInput(
                "urls must be a list of strings".to_string(),
            )),
        })
        .collect()
}

/// Job picked by the dispatcher, already flipped to `running`
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub url: String,
}

/// Failure report stored on a job that ends in `error`
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub message: String,
    pub traceback: String,
}

/// How a running job was finalized
#[derive(Debug)]
pub enum Finished {
    Done(Job),
    Failed(Job),
    /// Cancel won the race; `discarded` holds the result thrown away, if any
    Cancelled { job: Job, discarded: Option<JobResult> },
}

/// Answer to a cancel request
#[derive(Debug)]
pub enum CancelOutcome {
    /// Job was still queued and is now cancelled
    Cancelled(Job),
    /// Job is running; the dispatcher will cancel it at its next checkpoint
    Flagged,
    /// Unknown job, or already in a terminal state
    Rejected,
}

impl CancelOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, CancelOutcome::Rejected)
    }
}

/// Per-status job counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
    pub cancelled: usize,
}

#[derive(Default)]
struct StoreInner {
    jobs: Vec<Job>,
    index: HashMap<JobId, usize>,
}

impl StoreInner {
    fn get(&self, id: &str) -> Option<&Job> {
        self.index.get(id).map(|&pos| &self.jobs[pos])
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Job> {
        match self.index.get(id) {
            Some(&pos) => self.jobs.get_mut(pos),
            None => None,
        }
    }
}

/// In-memory job store, the single source of truth for job state.
///
/// All reads and writes go through one async `RwLock`, so readers always see
/// whole transitions. Jobs are kept in insertion order, which doubles as the
/// dispatch order, and are never removed.
///
/// The cancellation registry lives next to the jobs but behind its own lock;
/// it is only touched while the job lock is already held (or on its own), so
/// the two never deadlock.
pub struct JobStore {
    inner: RwLock<StoreInner>,
    cancellations: Arc<CancelRegistry>,
    work_ready: Notify,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            cancellations: Arc::new(CancelRegistry::new()),
            work_ready: Notify::new(),
        }
    }

    pub fn cancellations(&self) -> &Arc<CancelRegistry> {
        &self.cancellations
    }

    /// Append one queued job per non-blank url and return their ids in input
    /// order. A batch is appended under a single lock, so concurrent batches
    /// never interleave.
    pub async fn enqueue<I, S>(&self, urls: I) -> Vec<JobId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let accepted: Vec<String> = urls
            .into_iter()
            .map(|url| url.as_ref().trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();

        if accepted.is_empty() {
            return Vec::new();
        }

        let mut ids = Vec::with_capacity(accepted.len());
        {
            let mut inner = self.inner.write().await;
            for url in accepted {
                let id = Uuid::now_v7().to_string();
                let position = inner.jobs.len();
                debug!(job_id = %id, %url, position, "Job enqueued");
                inner.jobs.push(Job::new(id.clone(), url));
                inner.index.insert(id.clone(), position);
                ids.push(id);
            }
        }

        self.work_ready.notify_one();
        ids
    }

    /// Resolves when new work may be available.
    pub async fn wait_for_work(&self) {
        self.work_ready.notified().await;
    }

    /// Point-in-time copy of every job, in insertion order
    pub async fn snapshot(&self) -> Vec<JobView> {
        let inner = self.inner.read().await;
        inner.jobs.iter().map(Job::view).collect()
    }

    pub async fn lookup(&self, id: &str) -> Option<Job> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn view(&self, id: &str) -> Option<JobView> {
        self.inner.read().await.get(id).map(Job::view)
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.read().await;
        let mut stats = QueueStats::default();
        for job in &inner.jobs {
            match job.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Done => stats.done += 1,
                JobStatus::Error => stats.error += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Pick the oldest queued job and flip it to `running` in the same
    /// critical section.
    pub async fn claim_next(&self) -> Option<ClaimedJob> {
        let mut inner = self.inner.write().await;
        let job = inner
            .jobs
            .iter_mut()
            .find(|job| job.status == JobStatus::Queued)?;

        if let Err(err) = job.start() {
            // Unreachable for a queued job; keep the loop alive regardless.
            warn!(error = %err, "Failed to start queued job");
            return None;
        }

        info!(job_id = %job.id, url = %job.url, "Job started");
        Some(ClaimedJob {
            id: job.id.clone(),
            url: job.url.clone(),
        })
    }

    /// Merge a progress update into a running job. Returns false when the job
    /// is unknown or no longer running.
    pub async fn apply_progress(&self, id: &str, update: ProgressUpdate) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get_mut(id) {
            Some(job) => job.apply_progress(update),
            None => false,
        }
    }

    /// Handle a user cancel request.
    ///
    /// Queued jobs are cancelled on the spot. Running jobs are only flagged:
    /// their fetch keeps going and the dispatcher settles them afterwards.
    pub async fn request_cancel(&self, id: &str) -> CancelOutcome {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.get_mut(id) else {
            return CancelOutcome::Rejected;
        };

        match job.status {
            JobStatus::Queued => match job.cancel() {
                Ok(()) => {
                    info!(job_id = %id, "Queued job cancelled");
                    CancelOutcome::Cancelled(job.clone())
                }
                Err(err) => {
                    warn!(error = %err, "Failed to cancel queued job");
                    CancelOutcome::Rejected
                }
            },
            JobStatus::Running => {
                self.cancellations.mark(id);
                info!(job_id = %id, "Cancel requested for running job");
                CancelOutcome::Flagged
            }
            _ => CancelOutcome::Rejected,
        }
    }

    /// Checkpoint before a fetch starts. If a cancel is pending, the job is
    /// finalized as cancelled and returned.
    pub async fn cancel_if_requested(&self, id: &str) -> Result<Option<Job>> {
        let mut inner = self.inner.write().await;
        let job = inner
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;

        if !self.cancellations.take(id) {
            return Ok(None);
        }

        job.cancel()?;
        info!(job_id = %id, "Job cancelled before fetch");
        Ok(Some(job.clone()))
    }

    /// Checkpoint after a fetch returns. A pending cancel always wins over
    /// the fetch outcome; the result, if any, is discarded.
    pub async fn finish(
        &self,
        id: &str,
        outcome: std::result::Result<JobResult, JobFailure>,
    ) -> Result<Finished> {
        let mut inner = self.inner.write().await;
        let job = inner
            .get_mut(id)
            .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;

        if self.cancellations.take(id) {
            job.cancel()?;
            let discarded = outcome.ok();
            info!(
                job_id = %id,
                had_result = discarded.is_some(),
                "Cancel raced with fetch completion, job cancelled"
            );
            return Ok(Finished::Cancelled {
                job: job.clone(),
                discarded,
            });
        }

        match outcome {
            Ok(result) => {
                job.complete(result)?;
                info!(job_id = %id, "Job done");
                Ok(Finished::Done(job.clone()))
            }
            Err(failure) => {
                job.fail(failure.message, failure.traceback)?;
                info!(job_id = %id, error = ?job.error, "Job failed");
                Ok(Finished::Failed(job.clone()))
            }
        }
    }
}
