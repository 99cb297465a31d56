use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job::{Job, JobId, JobView};
use super::store::{CancelOutcome, JobStore, QueueStats};
use crate::fetch::Fetcher;
use crate::observability::Metrics;
use crate::worker::cleanup::{Cleanup, CleanupTarget};
use crate::worker::runner::Dispatcher;
use crate::worker::WorkerConfig;

/// JobBroker is the front door of the queue.
///
/// Architecture:
/// 1. API calls `broker.enqueue(urls)`
/// 2. Broker appends queued jobs to the [`JobStore`] (one lock per batch)
/// 3. Broker makes sure exactly one [`Dispatcher`] is alive
/// 4. The dispatcher drains jobs one at a time, in insertion order
///
/// The broker is NOT a separate task - it's just a struct with methods
/// called by API handlers. The only task it owns is the dispatcher, which
/// is spawned lazily on the first non-empty enqueue and kept alive after.
pub struct JobBroker {
    store: Arc<JobStore>,
    fetcher: Arc<dyn Fetcher>,
    cleanup: Arc<dyn Cleanup>,
    metrics: Arc<Metrics>,
    worker_config: WorkerConfig,
    shutdown: CancellationToken,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl JobBroker {
    pub fn new(
        store: Arc<JobStore>,
        fetcher: Arc<dyn Fetcher>,
        cleanup: Arc<dyn Cleanup>,
        metrics: Arc<Metrics>,
        worker_config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            cleanup,
            metrics,
            worker_config,
            shutdown: CancellationToken::new(),
            runner: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Enqueue a batch of urls and wake the dispatcher.
    ///
    /// Blank entries are skipped. Returns the new job ids in input order;
    /// an empty result means nothing was queued and no dispatcher is started.
    pub async fn enqueue<I, S>(&self, urls: I) -> Vec<JobId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = self.store.enqueue(urls).await;
        if ids.is_empty() {
            debug!("Nothing to enqueue");
            return ids;
        }

        self.metrics.jobs_enqueued(ids.len() as u64);
        self.ensure_runner();
        ids
    }

    /// Start the dispatcher unless one is already running.
    ///
    /// Returns true when a new dispatcher was spawned. Must be called from
    /// within a tokio runtime.
    pub fn ensure_runner(&self) -> bool {
        if self.shutdown.is_cancelled() {
            debug!("Broker is shut down, not starting dispatcher");
            return false;
        }

        let mut runner = self
            .runner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if runner.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.cleanup),
            Arc::clone(&self.metrics),
            self.worker_config.clone(),
            self.shutdown.child_token(),
        );
        *runner = Some(tokio::spawn(dispatcher.run()));
        info!("Dispatcher spawned");
        true
    }

    pub fn is_runner_active(&self) -> bool {
        self.runner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn snapshot(&self) -> Vec<JobView> {
        self.store.snapshot().await
    }

    pub async fn lookup(&self, id: &str) -> Option<Job> {
        self.store.lookup(id).await
    }

    pub async fn view(&self, id: &str) -> Option<JobView> {
        self.store.view(id).await
    }

    pub async fn stats(&self) -> QueueStats {
        self.store.stats().await
    }

    /// Ask for a job to be cancelled.
    ///
    /// Returns true when the request was accepted: the job was queued (and is
    /// now cancelled, leftovers removed) or running (flagged for the
    /// dispatcher). Unknown and finished jobs return false.
    pub async fn request_cancel(&self, id: &str) -> bool {
        match self.store.request_cancel(id).await {
            CancelOutcome::Cancelled(job) => {
                self.metrics.job_cancelled();
                self.cleanup
                    .cleanup(&CleanupTarget::from_job(&job, None))
                    .await;
                true
            }
            CancelOutcome::Flagged => true,
            CancelOutcome::Rejected => {
                debug!(job_id = %id, "Cancel rejected");
                false
            }
        }
    }

    /// Stop the dispatcher after its current job, if any.
    ///
    /// Queued jobs stay queued; a fetch in flight is not interrupted.
    pub fn shutdown(&self) {
        info!("Stopping dispatcher");
        self.shutdown.cancel();
    }

    /// Wait for the dispatcher task to exit. Call after [`Self::shutdown`].
    pub async fn join(&self) {
        let handle = self
            .runner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "Dispatcher task ended abnormally");
            }
        }
    }
}
