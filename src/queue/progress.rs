//! Progress snapshots and the sink used by fetchers to report them.
//!
//! Fetchers run on a blocking thread. They never touch the job store
//! directly: every update goes through [`ProgressSink::report`], which pushes
//! onto an unbounded channel drained by the dispatcher. The channel never
//! blocks the sender, so a slow store cannot stall a download.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use super::cancel::CancelRegistry;
use super::job::JobId;

/// Progress snapshot of a job, merged field by field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes_estimate: Option<u64>,
    /// Always within `[0, 100]`
    pub progress_pct: f64,
    /// Bytes per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Seconds remaining
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<u64>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            status: None,
            downloaded_bytes: None,
            total_bytes: None,
            total_bytes_estimate: None,
            progress_pct: 0.0,
            speed: None,
            eta: None,
        }
    }
}

impl Progress {
    /// Overwrite every field present in `update`, keep the rest.
    ///
    /// `progress_pct` is recomputed from the merged byte counts whenever a
    /// positive total is known; otherwise an explicitly reported percentage
    /// is taken as is (clamped).
    pub fn merge(&mut self, update: &ProgressUpdate) {
        if let Some(status) = &update.status {
            self.status = Some(status.clone());
        }
        if let Some(downloaded) = update.downloaded_bytes {
            self.downloaded_bytes = Some(downloaded);
        }
        if let Some(total) = update.total_bytes {
            self.total_bytes = Some(total);
        }
        if let Some(estimate) = update.total_bytes_estimate {
            self.total_bytes_estimate = Some(estimate);
        }
        if let Some(speed) = update.speed {
            self.speed = Some(speed);
        }
        if let Some(eta) = update.eta {
            self.eta = Some(eta);
        }
        if let Some(pct) = update.progress_pct {
            self.progress_pct = clamp_pct(pct);
        }
        if let Some(pct) = self.derived_pct() {
            self.progress_pct = pct;
        }
    }

    fn derived_pct(&self) -> Option<f64> {
        let downloaded = self.downloaded_bytes?;
        let total = self
            .total_bytes
            .filter(|total| *total > 0)
            .or(self.total_bytes_estimate.filter(|total| *total > 0))?;
        Some(clamp_pct(downloaded as f64 * 100.0 / total as f64))
    }
}

fn clamp_pct(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Partial progress report; `None` means "not reported this time"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub status: Option<String>,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub total_bytes_estimate: Option<u64>,
    pub progress_pct: Option<f64>,
    pub speed: Option<f64>,
    pub eta: Option<u64>,
    /// Media id, when the fetcher already knows it
    pub source_id: Option<String>,
    /// Partial file currently being written
    pub tmpfilename: Option<PathBuf>,
    /// File the current partial will be renamed to
    pub filename: Option<PathBuf>,
}

impl ProgressUpdate {
    pub fn artifact_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.tmpfilename.iter().chain(self.filename.iter()).cloned()
    }
}

/// Handle given to a fetcher for one job.
///
/// Cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct ProgressSink {
    job_id: JobId,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
    cancellations: Arc<CancelRegistry>,
}

impl ProgressSink {
    pub fn channel(
        job_id: JobId,
        cancellations: Arc<CancelRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            job_id,
            tx,
            cancellations,
        };
        (sink, rx)
    }

    /// True once a cancel was requested for this job. Fetchers may use it to
    /// skip optional work; the download itself keeps running.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancellations.is_marked(&self.job_id)
    }

    /// Forward an update. Returns false when it was dropped, either because
    /// the job is being cancelled or because nobody is listening anymore.
    pub fn report(&self, update: ProgressUpdate) -> bool {
        if self.is_cancel_requested() {
            trace!(job_id = %self.job_id, "Dropping progress for cancelled job");
            return false;
        }
        self.tx.send(update).is_ok()
    }
}
