//! Download worker
//!
//! A single dispatcher task drains the job store one job at a time,
//! running the fetcher on the blocking pool and cleaning up after
//! cancelled jobs.

pub mod cleanup;
pub mod runner;

use std::time::Duration;

use crate::config::Config;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle re-check interval when no wake-up arrives
    pub poll_interval: Duration,
    /// How long to wait for buffered progress after a fetch returns
    pub progress_drain: Duration,
    pub format_selector: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            progress_drain: Duration::from_millis(1000),
            format_selector: "bv*+ba/b".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.runner.poll_interval_ms),
            progress_drain: Duration::from_millis(config.runner.progress_drain_ms),
            format_selector: config.downloads.format_selector.clone(),
        }
    }
}
