use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tempfile::TempDir;

use vidqueue::fetch::{FetchError, FetchRequest, Fetcher, ProbeError};
use vidqueue::observability::Metrics;
use vidqueue::queue::{
    CANCELLED_MESSAGE, Job, JobBroker, JobResult, JobStatus, JobStore, ProgressSink,
    ProgressUpdate,
};
use vidqueue::worker::WorkerConfig;
use vidqueue::worker::cleanup::FsCleanup;

/// In-memory fetcher driven by the url:
/// - the last path segment is the media id
/// - ids starting with `fail` end in an error
/// - urls registered with [`ScriptedFetcher::gate`] leave a partial file
///   named after the media id, report progress, then block until the gate
///   opens
struct ScriptedFetcher {
    output_dir: PathBuf,
    calls: Mutex<Vec<String>>,
    gates: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl ScriptedFetcher {
    fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            calls: Mutex::new(Vec::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, url: &str) -> Arc<AtomicBool> {
        let gate = Arc::new(AtomicBool::new(false));
        self.gates
            .lock()
            .unwrap()
            .insert(url.to_string(), Arc::clone(&gate));
        gate
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(
        &self,
        request: &FetchRequest,
        progress: &ProgressSink,
    ) -> Result<JobResult, FetchError> {
        self.calls.lock().unwrap().push(request.url.clone());
        let media_id = request.url.rsplit('/').next().unwrap_or("x").to_string();

        let gate = self.gates.lock().unwrap().get(&request.url).cloned();
        if let Some(gate) = gate {
            let partial = self.output_dir.join(format!("clip [{media_id}].f137.mp4.part"));
            std::fs::write(&partial, b"partial").map_err(FetchError::Io)?;
            progress.report(ProgressUpdate {
                status: Some("downloading".to_string()),
                downloaded_bytes: Some(500),
                total_bytes: Some(1000),
                source_id: Some(media_id.clone()),
                ..Default::default()
            });
            let deadline = Instant::now() + Duration::from_secs(10);
            while !gate.load(Ordering::SeqCst) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        if media_id.starts_with("fail") {
            return Err(FetchError::Process {
                message: format!("[generic] {media_id}: Unsupported URL"),
                code: Some(1),
                stderr: format!("ERROR: [generic] {media_id}: Unsupported URL"),
            });
        }

        let filepath = self.output_dir.join(format!("clip [{media_id}].mp4"));
        std::fs::write(&filepath, b"media").map_err(FetchError::Io)?;
        Ok(JobResult {
            title: format!("clip {media_id}"),
            id: media_id,
            filepath,
        })
    }

    fn probe(&self, _url: &str) -> Result<Value, ProbeError> {
        Err(ProbeError::NoMetadata)
    }
}

struct Harness {
    broker: JobBroker,
    fetcher: Arc<ScriptedFetcher>,
    metrics: Arc<Metrics>,
    dir: TempDir,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new(dir.path().to_path_buf()));
    let cleanup = Arc::new(FsCleanup::new(
        dir.path(),
        dir.path().join(".vidqueue-tmp"),
        vec![".part".to_string(), ".ytdl".to_string()],
        Duration::from_secs(60),
    ));
    let metrics = Arc::new(Metrics::new());
    let broker = JobBroker::new(
        Arc::new(JobStore::new()),
        fetcher.clone(),
        cleanup,
        metrics.clone(),
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            progress_drain: Duration::from_millis(500),
            ..WorkerConfig::default()
        },
    );

    Harness {
        broker,
        fetcher,
        metrics,
        dir,
    }
}

async fn wait_for<F>(broker: &JobBroker, id: &str, condition: F) -> Job
where
    F: Fn(&Job) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let job = broker.lookup(id).await.expect("job exists");
        if condition(&job) {
            return job;
        }
        assert!(Instant::now() < deadline, "timed out waiting on job {id}: {job:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_terminal(broker: &JobBroker, id: &str) -> Job {
    wait_for(broker, id, |job| job.status.is_terminal()).await
}

#[tokio::test]
async fn test_jobs_run_in_fifo_order() {
    let h = harness();
    let urls = ["https://x/a1", "https://x/b2", "https://x/c3"];

    let ids = h.broker.enqueue(urls).await;
    assert_eq!(ids.len(), 3);

    for id in &ids {
        let job = wait_terminal(&h.broker, id).await;
        assert_eq!(job.status, JobStatus::Done);
        let result = job.result.unwrap();
        assert!(result.filepath.exists());
        assert!(job.error.is_none());
    }

    assert_eq!(h.fetcher.calls(), urls.to_vec());
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.jobs_enqueued, 3);
    assert_eq!(snapshot.jobs_done, 3);
}

#[tokio::test]
async fn test_blank_input_creates_nothing() {
    let h = harness();

    let ids = h.broker.enqueue(["https://x/1", "  ", "https://x/2"]).await;
    assert_eq!(ids.len(), 2);

    let ids = h.broker.enqueue(["", "   "]).await;
    assert!(ids.is_empty());
    assert_eq!(h.broker.snapshot().await.len(), 2);
}

#[tokio::test]
async fn test_failure_is_recorded_and_queue_continues() {
    let h = harness();

    let ids = h.broker.enqueue(["https://x/fail-1", "https://x/ok-2"]).await;

    let failed = wait_terminal(&h.broker, &ids[0]).await;
    assert_eq!(failed.status, JobStatus::Error);
    assert_eq!(failed.error.as_deref(), Some("[generic] fail-1: Unsupported URL"));
    assert!(failed.traceback.unwrap().contains("ERROR:"));
    assert!(failed.result.is_none());

    let done = wait_terminal(&h.broker, &ids[1]).await;
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(h.metrics.snapshot().jobs_failed, 1);
}

#[tokio::test]
async fn test_queued_jobs_wait_behind_running_job() {
    let h = harness();
    let gate = h.fetcher.gate("https://x/first");

    let ids = h.broker.enqueue(["https://x/first", "https://x/second"]).await;
    wait_for(&h.broker, &ids[0], |job| job.status == JobStatus::Running).await;

    let second = h.broker.lookup(&ids[1]).await.unwrap();
    assert_eq!(second.status, JobStatus::Queued);
    assert_eq!(second.progress.progress_pct, 0.0);

    gate.store(true, Ordering::SeqCst);
    wait_terminal(&h.broker, &ids[1]).await;
}

#[tokio::test]
async fn test_progress_visible_while_running() {
    let h = harness();
    let gate = h.fetcher.gate("https://x/slow");

    let ids = h.broker.enqueue(["https://x/slow"]).await;
    let running = wait_for(&h.broker, &ids[0], |job| {
        job.status == JobStatus::Running && job.progress.downloaded_bytes.is_some()
    })
    .await;

    assert_eq!(running.progress.downloaded_bytes, Some(500));
    assert_eq!(running.progress.total_bytes, Some(1000));
    assert_eq!(running.progress.progress_pct, 50.0);
    assert_eq!(running.progress.status.as_deref(), Some("downloading"));

    gate.store(true, Ordering::SeqCst);
    let done = wait_terminal(&h.broker, &ids[0]).await;
    assert_eq!(done.status, JobStatus::Done);
}

#[tokio::test]
async fn test_cancel_queued_job_is_never_fetched() {
    let h = harness();
    let gate = h.fetcher.gate("https://x/first");

    // finished download of an earlier job, with a title that looks like a
    // format stream
    let finished = h.dir.path().join("Formula.f1.Highlights_[abc123].mp4");
    std::fs::write(&finished, b"media").unwrap();

    let ids = h.broker.enqueue(["https://x/first", "https://x/second"]).await;
    wait_for(&h.broker, &ids[0], |job| job.status == JobStatus::Running).await;

    assert!(h.broker.request_cancel(&ids[1]).await);
    assert!(finished.exists());
    let cancelled = h.broker.lookup(&ids[1]).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_MESSAGE));

    gate.store(true, Ordering::SeqCst);
    assert_eq!(wait_terminal(&h.broker, &ids[0]).await.status, JobStatus::Done);

    // give the dispatcher a chance to (wrongly) pick the cancelled job
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.fetcher.calls(), vec!["https://x/first".to_string()]);
    assert_eq!(
        h.broker.lookup(&ids[1]).await.unwrap().status,
        JobStatus::Cancelled
    );
}

#[tokio::test]
async fn test_cancel_running_job_discards_result_and_file() {
    let h = harness();
    let url = "https://x/vid42";
    let gate = h.fetcher.gate(url);

    let ids = h.broker.enqueue([url]).await;
    wait_for(&h.broker, &ids[0], |job| job.status == JobStatus::Running).await;

    assert!(h.broker.request_cancel(&ids[0]).await);
    // cooperative: still running until the fetch returns
    assert_eq!(
        h.broker.lookup(&ids[0]).await.unwrap().status,
        JobStatus::Running
    );

    gate.store(true, Ordering::SeqCst);
    let job = wait_terminal(&h.broker, &ids[0]).await;

    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.result.is_none());
    assert!(job.traceback.is_none());
    assert_eq!(job.error.as_deref(), Some(CANCELLED_MESSAGE));
    assert!(!h.dir.path().join("clip [vid42].mp4").exists());
    assert_eq!(h.metrics.snapshot().jobs_cancelled, 1);
}

#[tokio::test]
async fn test_cancel_running_job_that_fails_ends_cancelled() {
    let h = harness();
    let url = "https://x/fail-late";
    let gate = h.fetcher.gate(url);

    let unrelated = [
        h.dir.path().join("other [zzz].mp4"),
        h.dir.path().join("other [zzz].f137.mp4.part"),
        h.dir.path().join("Formula.f1.Highlights_[abc123].mp4"),
    ];
    for path in &unrelated {
        std::fs::write(path, b"keep").unwrap();
    }

    let ids = h.broker.enqueue([url]).await;
    // the media id only reaches the job through progress
    wait_for(&h.broker, &ids[0], |job| job.source_id.is_some()).await;

    assert!(h.broker.request_cancel(&ids[0]).await);
    gate.store(true, Ordering::SeqCst);

    let job = wait_terminal(&h.broker, &ids[0]).await;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.traceback.is_none());
    assert_eq!(h.metrics.snapshot().jobs_failed, 0);

    assert!(!h.dir.path().join("clip [fail-late].f137.mp4.part").exists());
    for path in &unrelated {
        assert!(path.exists(), "{} was removed", path.display());
    }
}

#[tokio::test]
async fn test_cancel_finished_jobs_rejected() {
    let h = harness();

    let ids = h.broker.enqueue(["https://x/ok", "https://x/fail-x"]).await;
    let done = wait_terminal(&h.broker, &ids[0]).await;
    let failed = wait_terminal(&h.broker, &ids[1]).await;

    assert!(!h.broker.request_cancel(&ids[0]).await);
    assert!(!h.broker.request_cancel(&ids[1]).await);
    assert!(!h.broker.request_cancel("no-such-job").await);

    let after_done = h.broker.lookup(&ids[0]).await.unwrap();
    assert_eq!(after_done.status, JobStatus::Done);
    assert_eq!(after_done.result, done.result);
    assert!(after_done.result.unwrap().filepath.exists());

    let after_failed = h.broker.lookup(&ids[1]).await.unwrap();
    assert_eq!(after_failed.status, JobStatus::Error);
    assert_eq!(after_failed.error, failed.error);
}

#[tokio::test]
async fn test_concurrent_batches_stay_contiguous() {
    let h = harness();
    // keep the dispatcher busy so the snapshot reflects insertion order only
    let gate = h.fetcher.gate("https://x/blocker");
    h.broker.enqueue(["https://x/blocker"]).await;

    let batch_a: Vec<String> = (0..5).map(|i| format!("https://a/{i}")).collect();
    let batch_b: Vec<String> = (0..5).map(|i| format!("https://b/{i}")).collect();

    let (ids_a, ids_b) = tokio::join!(
        h.broker.enqueue(batch_a.clone()),
        h.broker.enqueue(batch_b.clone())
    );
    assert_eq!(ids_a.len(), 5);
    assert_eq!(ids_b.len(), 5);

    let urls: Vec<String> = h
        .broker
        .snapshot()
        .await
        .into_iter()
        .skip(1)
        .map(|job| job.url)
        .collect();

    let a_then_b: Vec<String> = batch_a.iter().chain(batch_b.iter()).cloned().collect();
    let b_then_a: Vec<String> = batch_b.iter().chain(batch_a.iter()).cloned().collect();
    assert!(urls == a_then_b || urls == b_then_a, "batches interleaved: {urls:?}");

    gate.store(true, Ordering::SeqCst);
}
