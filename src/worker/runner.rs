//! Dispatcher loop - runs queued jobs one at a time

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::WorkerConfig;
use super::cleanup::{Cleanup, CleanupTarget};
use crate::fetch::{FetchError, FetchRequest, Fetcher};
use crate::humanize::ByteSize;
use crate::observability::Metrics;
use crate::queue::store::{ClaimedJob, Finished, JobFailure, JobStore};
use crate::queue::{JobId, JobResult, ProgressSink, ProgressUpdate};

/// Single consumer of the job store.
///
/// Loop:
/// 1. Claim the oldest queued job (flipped to `running` atomically)
/// 2. If a cancel arrived in between, finalize as cancelled and clean up
/// 3. Run the fetcher on the blocking pool, forwarding progress
/// 4. Finalize: a pending cancel wins over the fetch outcome
/// 5. When nothing is queued, sleep until woken, the poll interval passes,
///    or shutdown is requested
///
/// Nothing a fetcher does can end the loop; errors and panics become job
/// failures.
pub struct Dispatcher {
    store: Arc<JobStore>,
    fetcher: Arc<dyn Fetcher>,
    cleanup: Arc<dyn Cleanup>,
    metrics: Arc<Metrics>,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        store: Arc<JobStore>,
        fetcher: Arc<dyn Fetcher>,
        cleanup: Arc<dyn Cleanup>,
        metrics: Arc<Metrics>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            fetcher,
            cleanup,
            metrics,
            config,
            shutdown,
        }
    }

    pub async fn run(self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Dispatcher started"
        );

        while !self.shutdown.is_cancelled() {
            match self.store.claim_next().await {
                Some(job) => self.execute(job).await,
                None => self.idle().await,
            }
        }

        info!("Dispatcher stopped");
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.store.wait_for_work() => trace!("Dispatcher woken"),
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }

    async fn execute(&self, job: ClaimedJob) {
        match self.store.cancel_if_requested(&job.id).await {
            Ok(Some(cancelled)) => {
                self.metrics.job_cancelled();
                self.cleanup
                    .cleanup(&CleanupTarget::from_job(&cancelled, None))
                    .await;
                return;
            }
            Ok(None) => {}
            Err(err) => {
                error!(job_id = %job.id, error = %err, "Pre-fetch checkpoint failed");
                return;
            }
        }
        self.metrics.job_started();

        let outcome = self.fetch(&job).await.map_err(|err| {
            warn!(job_id = %job.id, error = %err, "Fetch failed");
            JobFailure {
                message: err.to_string(),
                traceback: err.diagnostic(),
            }
        });

        match self.store.finish(&job.id, outcome).await {
            Ok(Finished::Done(done)) => {
                self.metrics.job_done();
                if let Some(result) = &done.result {
                    log_artifact(&done.id, result).await;
                }
            }
            Ok(Finished::Failed(_)) => self.metrics.job_failed(),
            Ok(Finished::Cancelled { job: cancelled, discarded }) => {
                self.metrics.job_cancelled();
                self.cleanup
                    .cleanup(&CleanupTarget::from_job(&cancelled, discarded.as_ref()))
                    .await;
            }
            Err(err) => error!(job_id = %job.id, error = %err, "Failed to finalize job"),
        }
    }

    /// Run the fetcher for one job and wait for its progress to settle.
    async fn fetch(&self, job: &ClaimedJob) -> Result<JobResult, FetchError> {
        let (sink, updates) =
            ProgressSink::channel(job.id.clone(), Arc::clone(self.store.cancellations()));
        let mut forwarder = tokio::spawn(forward_progress(
            Arc::clone(&self.store),
            job.id.clone(),
            updates,
        ));

        let fetcher = Arc::clone(&self.fetcher);
        let request = FetchRequest {
            job_id: job.id.clone(),
            url: job.url.clone(),
            format_selector: self.config.format_selector.clone(),
        };

        // The sink moves into the closure and is dropped with it, which
        // closes the channel and lets the forwarder finish.
        let joined = tokio::task::spawn_blocking(move || fetcher.fetch(&request, &sink)).await;

        if tokio::time::timeout(self.config.progress_drain, &mut forwarder)
            .await
            .is_err()
        {
            debug!(job_id = %job.id, "Progress drain timed out");
            forwarder.abort();
        }

        joined.unwrap_or_else(|err| {
            error!(job_id = %job.id, error = %err, "Fetcher panicked");
            Err(FetchError::Aborted(err.to_string()))
        })
    }
}

async fn forward_progress(
    store: Arc<JobStore>,
    job_id: JobId,
    mut updates: mpsc::UnboundedReceiver<ProgressUpdate>,
) {
    while let Some(update) = updates.recv().await {
        trace!(job_id = %job_id, ?update, "Progress update");
        store.apply_progress(&job_id, update).await;
    }
}

async fn log_artifact(job_id: &str, result: &JobResult) {
    match tokio::fs::metadata(&result.filepath).await {
        Ok(meta) => info!(
            job_id,
            title = %result.title,
            path = %result.filepath.display(),
            size = %ByteSize(meta.len()),
            "Download stored"
        ),
        Err(_) => info!(
            job_id,
            title = %result.title,
            path = %result.filepath.display(),
            "Download stored"
        ),
    }
}
