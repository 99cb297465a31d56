//! Tracing setup and in-process job counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "vidqueue=info,tower_http=info";

/// Install the global fmt subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Metrics handle for recording job lifecycle counters
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_enqueued: AtomicU64,
    jobs_started: AtomicU64,
    jobs_done: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_cancelled: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs_enqueued(&self, count: u64) {
        self.jobs_enqueued.fetch_add(count, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_enqueued", count, "Metric incremented");
    }

    pub fn job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_started", "Metric incremented");
    }

    pub fn job_done(&self) {
        self.jobs_done.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_done", "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "Metric incremented");
    }

    pub fn job_cancelled(&self) {
        self.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_cancelled", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_done: self.jobs_done.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_enqueued: u64,
    pub jobs_started: u64,
    pub jobs_done: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
}
